// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    DownloadFromContainerOptions as BollardDownloadFromContainerOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    UploadToContainerOptions as BollardUploadToContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::files::{build_tar, is_excluded_output, read_tar_files, tar_directory};
use super::language::Language;
use super::retry::{execute_with_retry, RetryScope};
use super::{resolve_execution_id, CodeExecutor};
use crate::config::{ContainerExecutorConfig, ExecutionConfig};
use crate::context::{CodeExecutorContext, InvocationContext};
use crate::core_types::{
    CodeExecutionFile, CodeExecutionInput, CodeExecutionResult, ExecutionError, ExecutionErrorKind,
};
use crate::errors::CodeExecutorError;

/// Label carrying the execution id on every container this executor creates.
pub const EXECUTION_ID_LABEL: &str = "codexec.execution_id";

/// Runs code inside containers. Non-stateful calls get a fresh container that
/// is removed afterwards; stateful calls share one container per execution id
/// until [`CodeExecutor::close`].
pub struct ContainerCodeExecutor {
    docker: Docker,
    config: ExecutionConfig,
    settings: ContainerExecutorConfig,
    image: String,
    /// Tracking key -> container id. Stateful containers are keyed by
    /// execution id, per-call containers by a unique `ephemeral:` key.
    active_containers: Mutex<HashMap<String, String>>,
}

impl ContainerCodeExecutor {
    pub async fn new(
        config: ExecutionConfig,
        settings: ContainerExecutorConfig,
    ) -> Result<Self, CodeExecutorError> {
        config.validate()?;
        let image = settings.resolve_image()?;
        if let Some(docker_path) = &settings.docker_path {
            if !docker_path.is_dir() {
                return Err(CodeExecutorError::Config(format!(
                    "Dockerfile directory '{}' does not exist",
                    docker_path.display()
                )));
            }
        }

        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            CodeExecutorError::Config(format!("Failed to connect to Docker: {}", e))
        })?;
        docker.ping().await.map_err(|e| {
            CodeExecutorError::Config(format!("Docker daemon is not reachable: {}", e))
        })?;

        log::info!("Container code executor ready (image '{}')", image);
        Ok(Self {
            docker,
            config,
            settings,
            image,
            active_containers: Mutex::new(HashMap::new()),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Container currently tracked for a stateful execution id.
    pub fn active_container(&self, execution_id: &str) -> Option<String> {
        self.containers().get(execution_id).cloned()
    }

    fn containers(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.active_containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn ensure_image(&self) -> Result<(), CodeExecutorError> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            return Ok(());
        }
        match &self.settings.docker_path {
            Some(docker_path) => self.build_image(docker_path).await,
            None => self.pull_image().await,
        }
    }

    async fn pull_image(&self) -> Result<(), CodeExecutorError> {
        log::info!("Pulling image '{}'", self.image);
        let options = Some(BollardCreateImageOptionsQuery {
            from_image: Some(self.image.clone()),
            ..Default::default()
        });
        let mut pull_stream = self.docker.create_image(options, None, None);
        while let Some(progress) = pull_stream.next().await {
            let progress = progress.map_err(|e| CodeExecutorError::container("pull image", e))?;
            if let Some(status) = progress.status {
                log::debug!("{}: {}", self.image, status);
            }
        }
        Ok(())
    }

    #[allow(deprecated)]
    async fn build_image(&self, docker_path: &Path) -> Result<(), CodeExecutorError> {
        log::info!(
            "Building image '{}' from {}",
            self.image,
            docker_path.display()
        );
        let context = tar_directory(docker_path)?;
        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(&self.image)
            .rm(true)
            .build();

        let mut build_stream =
            self.docker
                .build_image(options, None, Some(bollard::body_full(context.into())));
        while let Some(info) = build_stream.next().await {
            let info = info.map_err(|e| CodeExecutorError::container("build image", e))?;
            if let Some(error) = info.error {
                return Err(CodeExecutorError::container("build image", error));
            }
            if let Some(stream) = info.stream {
                let line = stream.trim_end();
                if !line.is_empty() {
                    log::debug!("{}", line);
                }
            }
        }
        Ok(())
    }

    async fn create_container(&self, execution_id: &str) -> Result<String, CodeExecutorError> {
        self.ensure_image().await?;

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(format!("codexec-{}", Uuid::new_v4())),
            ..Default::default()
        });
        let body = ContainerCreateBody {
            image: Some(self.image.clone()),
            // Keeps the container alive between execs.
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            working_dir: Some(self.settings.working_dir.clone()),
            labels: Some(HashMap::from([(
                EXECUTION_ID_LABEL.to_string(),
                execution_id.to_string(),
            )])),
            network_disabled: Some(self.settings.network_mode == "none"),
            host_config: Some(HostConfig {
                network_mode: Some(self.settings.network_mode.clone()),
                auto_remove: Some(!self.config.stateful),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(options, body)
            .await
            .map_err(|e| CodeExecutorError::container("create container", e))?;
        self.docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await
            .map_err(|e| CodeExecutorError::container("start container", e))?;

        log::debug!(
            "Started container {} for execution '{}'",
            container.id,
            execution_id
        );
        Ok(container.id)
    }

    async fn container_for(&self, key: &str, execution_id: &str) -> Result<String, CodeExecutorError> {
        let existing = self.containers().get(key).cloned();
        if let Some(container_id) = existing {
            return Ok(container_id);
        }
        let container_id = self.create_container(execution_id).await?;
        self.containers()
            .insert(key.to_string(), container_id.clone());
        Ok(container_id)
    }

    async fn remove_container(&self, container_id: &str) {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            ..Default::default()
        });
        match self.docker.remove_container(container_id, options).await {
            Ok(()) => log::debug!("Removed container {}", container_id),
            // Auto-removal may have won the race.
            Err(e) => log::debug!("Could not remove container {}: {}", container_id, e),
        }
    }

    async fn release(&self, key: &str) {
        let container_id = self.containers().remove(key);
        if let Some(container_id) = container_id {
            self.remove_container(&container_id).await;
        }
    }

    async fn upload_files(
        &self,
        container_id: &str,
        files: &[(&str, &[u8])],
    ) -> Result<(), CodeExecutorError> {
        let archive = build_tar(files)?;
        let options = Some(BollardUploadToContainerOptionsQuery {
            path: self.settings.working_dir.clone(),
            ..Default::default()
        });
        self.docker
            .upload_to_container(container_id, options, bollard::body_full(archive.into()))
            .await
            .map_err(|e| CodeExecutorError::container("copy files into container", e))
    }

    async fn download_working_dir(
        &self,
        container_id: &str,
    ) -> Result<Vec<CodeExecutionFile>, CodeExecutorError> {
        let options = BollardDownloadFromContainerOptionsQuery {
            path: self.settings.working_dir.clone(),
        };
        let mut stream = self
            .docker
            .download_from_container(container_id, Some(options));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| CodeExecutorError::container("copy files from container", e))?;
            archive.extend_from_slice(&chunk);
        }
        Ok(read_tar_files(&archive)?)
    }

    /// Runs the command to completion, demultiplexing the attached stream into
    /// the two buffers. Returns the exec id.
    #[allow(deprecated)]
    async fn run_exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        env: Vec<String>,
        stdout: &mut String,
        stderr: &mut String,
    ) -> Result<String, CodeExecutorError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(command),
                    env: Some(env),
                    working_dir: Some(self.settings.working_dir.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| CodeExecutorError::container("create exec", e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| CodeExecutorError::container("start exec", e))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(frame) = output.next().await {
                match frame.map_err(|e| CodeExecutorError::container("read exec output", e))? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }
        Ok(exec.id)
    }

    async fn run_once(
        &self,
        key: &str,
        execution_id: &str,
        driver: &str,
        language: Language,
        input: &CodeExecutionInput,
    ) -> Result<CodeExecutionResult, CodeExecutorError> {
        let container_id = self.container_for(key, execution_id).await?;

        let source = language.prepare_source(&input.code);
        let mut staged: Vec<(&str, &[u8])> = input
            .input_files
            .iter()
            .map(|f| (f.name.as_str(), f.content.as_slice()))
            .collect();
        staged.push((driver, source.as_bytes()));
        self.upload_files(&container_id, &staged).await?;

        let before: HashSet<String> = self
            .download_working_dir(&container_id)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();

        let env = input
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        let timeout = input.timeout.unwrap_or(self.config.timeout);
        let mut stdout = String::new();
        let mut stderr = String::new();
        let outcome = tokio::time::timeout(
            timeout,
            self.run_exec(
                &container_id,
                language.container_command(driver),
                env,
                &mut stdout,
                &mut stderr,
            ),
        )
        .await;

        let exec_id = match outcome {
            Ok(exec_id) => exec_id?,
            Err(_) => {
                log::warn!(
                    "Execution timed out after {:?} in container {}",
                    timeout,
                    container_id
                );
                // The exec keeps running otherwise; the container goes with it.
                self.release(key).await;
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("Execution timed out after {:?}", timeout));
                return Err(CodeExecutorError::Timeout {
                    timeout,
                    result: Box::new(CodeExecutionResult {
                        stdout,
                        stderr,
                        exit_code: 1,
                        ..Default::default()
                    }),
                });
            }
        };

        let inspect = self
            .docker
            .inspect_exec(&exec_id)
            .await
            .map_err(|e| CodeExecutorError::container("inspect exec", e))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        if exit_code != 0 {
            return Err(CodeExecutorError::NonZeroExit {
                exit_code,
                result: Box::new(CodeExecutionResult {
                    stdout,
                    stderr,
                    exit_code,
                    error: Some(ExecutionError {
                        kind: ExecutionErrorKind::NonZeroExit,
                        message: format!("{} exited with status {}", language.name(), exit_code),
                    }),
                    ..Default::default()
                }),
            });
        }

        let input_names: HashSet<String> =
            input.input_files.iter().map(|f| f.name.clone()).collect();
        let output_files = self
            .download_working_dir(&container_id)
            .await?
            .into_iter()
            .filter(|f| !before.contains(&f.name) && !is_excluded_output(&f.name, &input_names))
            .collect();

        Ok(CodeExecutionResult {
            stdout,
            stderr,
            exit_code,
            output_files,
            ..Default::default()
        })
    }
}

#[async_trait]
impl CodeExecutor for ContainerCodeExecutor {
    async fn execute_code(
        &self,
        cancel: &CancellationToken,
        invocation: &InvocationContext,
        input: CodeExecutionInput,
    ) -> Result<Option<CodeExecutionResult>, CodeExecutorError> {
        let context = CodeExecutorContext::from_invocation(Some(invocation))
            .ok_or(CodeExecutorError::MissingSession)?;
        let execution_id = resolve_execution_id(&context, invocation, &input);
        context.add_processed_file_names(input.input_files.iter().map(|f| f.name.clone()));

        let key = if self.config.stateful {
            execution_id.clone()
        } else {
            format!("ephemeral:{}", Uuid::new_v4())
        };
        let language = Language::from_hint(input.language.as_deref());
        let driver = language.driver_file(&Uuid::new_v4().simple().to_string());

        let scope = RetryScope {
            config: &self.config,
            cancel,
            context: &context,
            invocation_id: &invocation.invocation_id,
            execution_id: &execution_id,
        };
        let (key_ref, execution_id_ref, driver_ref, input_ref) =
            (&key, &execution_id, &driver, &input);
        let outcome = execute_with_retry(scope, move |_| {
            self.run_once(key_ref, execution_id_ref, driver_ref, language, input_ref)
        })
        .await;

        // A cancelled exec keeps running in its container.
        if !self.config.stateful || matches!(outcome, Err(CodeExecutorError::Cancelled)) {
            self.release(&key).await;
        }
        outcome.map(Some)
    }

    fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    async fn close(&self) -> Result<(), CodeExecutorError> {
        let containers: Vec<String> = self.containers().drain().map(|(_, id)| id).collect();
        for container_id in containers {
            self.remove_container(&container_id).await;
        }
        Ok(())
    }
}
