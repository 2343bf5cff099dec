//! Host execution of model-generated code.
//!
//! Nothing here is sandboxed: code runs with the privileges of the current
//! process, which is why construction requires an explicit opt-in.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::files::{collect_new_files, snapshot_names, write_input_files};
use super::language::Language;
use super::retry::{execute_with_retry, RetryScope};
use super::{resolve_execution_id, CodeExecutor};
use crate::config::{ExecutionConfig, LocalExecutorConfig};
use crate::context::{CodeExecutorContext, InvocationContext};
use crate::core_types::{CodeExecutionInput, CodeExecutionResult, ExecutionError, ExecutionErrorKind};
use crate::errors::CodeExecutorError;

pub struct LocalCodeExecutor {
    config: ExecutionConfig,
    programs: LocalExecutorConfig,
    work_dir: PathBuf,
    /// Set when `work_dir` is a temporary directory created by this executor.
    /// Calls then run in their own subdirectory of it.
    owns_work_dir: bool,
    temp_dir: Mutex<Option<TempDir>>,
}

impl LocalCodeExecutor {
    pub fn new(
        config: ExecutionConfig,
        local: LocalExecutorConfig,
    ) -> Result<Self, CodeExecutorError> {
        if !local.allow_unsafe_execution {
            return Err(CodeExecutorError::Config(
                "Local code execution runs unsandboxed on the host; set allow_unsafe_execution to enable it"
                    .to_string(),
            ));
        }
        config.validate()?;

        let (work_dir, temp_dir) = match &local.working_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let temp_dir = tempfile::Builder::new().prefix("codexec-").tempdir()?;
                (temp_dir.path().to_path_buf(), Some(temp_dir))
            }
        };
        log::debug!("Local code executor working in {}", work_dir.display());

        Ok(Self {
            config,
            programs: local,
            work_dir,
            owns_work_dir: temp_dir.is_some(),
            temp_dir: Mutex::new(temp_dir),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Directory one call runs in and whether it is scratch space to remove
    /// afterwards. An explicit directory is shared by every call using it.
    fn call_dir(&self, input: &CodeExecutionInput, tag: &str) -> (PathBuf, bool) {
        match &input.working_dir {
            Some(dir) => (dir.clone(), false),
            None if self.owns_work_dir => (self.work_dir.join(format!("run-{}", tag)), true),
            None => (self.work_dir.clone(), false),
        }
    }

    async fn run_once(
        &self,
        dir: &Path,
        driver: &str,
        language: Language,
        input: &CodeExecutionInput,
        before: &HashSet<String>,
        input_names: &HashSet<String>,
    ) -> Result<CodeExecutionResult, CodeExecutorError> {
        if !language.reads_stdin() {
            fs::write(dir.join(driver), language.prepare_source(&input.code)).await?;
        }

        let (program, args) = language.local_command(&self.programs, driver);
        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(dir)
            .envs(&input.env)
            .stdin(if language.reads_stdin() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| CodeExecutorError::Spawn {
            program: program.clone(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let code = input.code.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(code.as_bytes()).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        log::warn!("Failed to write code to interpreter stdin: {}", e);
                    }
                }
            });
        }

        let timeout = input.timeout.unwrap_or(self.config.timeout);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                log::warn!("{} execution timed out after {:?}", language.name(), timeout);
                return Err(CodeExecutorError::Timeout {
                    timeout,
                    result: Box::new(CodeExecutionResult {
                        stderr: format!("Execution timed out after {:?}", timeout),
                        exit_code: 1,
                        ..Default::default()
                    }),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Killed by a signal: no exit code.
        let exit_code = output.status.code().map(i64::from).unwrap_or(-1);

        if !output.status.success() {
            return Err(CodeExecutorError::NonZeroExit {
                exit_code,
                result: Box::new(CodeExecutionResult {
                    stdout,
                    stderr,
                    exit_code,
                    error: Some(ExecutionError {
                        kind: ExecutionErrorKind::NonZeroExit,
                        message: format!("{} exited with status {}", program, exit_code),
                    }),
                    ..Default::default()
                }),
            });
        }

        let output_files = collect_new_files(dir, before, input_names).await?;
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
impl CodeExecutor for LocalCodeExecutor {
    async fn execute_code(
        &self,
        cancel: &CancellationToken,
        invocation: &InvocationContext,
        input: CodeExecutionInput,
    ) -> Result<Option<CodeExecutionResult>, CodeExecutorError> {
        let context = CodeExecutorContext::from_invocation(Some(invocation))
            .ok_or(CodeExecutorError::MissingSession)?;
        let execution_id = resolve_execution_id(&context, invocation, &input);

        let tag = Uuid::new_v4().simple().to_string();
        let (dir, scratch) = self.call_dir(&input, &tag);
        fs::create_dir_all(&dir).await?;

        write_input_files(&dir, &input.input_files).await?;
        let input_names: HashSet<String> =
            input.input_files.iter().map(|f| f.name.clone()).collect();
        context.add_processed_file_names(input.input_files.iter().map(|f| f.name.clone()));
        let before = snapshot_names(&dir).await?;

        let language = Language::from_hint(input.language.as_deref());
        let driver = language.driver_file(&tag);
        log::debug!(
            "Running {} code locally for execution '{}' in {}",
            language.name(),
            execution_id,
            dir.display()
        );

        let scope = RetryScope {
            config: &self.config,
            cancel,
            context: &context,
            invocation_id: &invocation.invocation_id,
            execution_id: &execution_id,
        };
        let outcome = {
            let (dir, driver, input, before, input_names) =
                (&dir, &driver, &input, &before, &input_names);
            execute_with_retry(scope, move |_| {
                self.run_once(dir, driver, language, input, before, input_names)
            })
            .await
        };

        if scratch {
            if let Err(e) = fs::remove_dir_all(&dir).await {
                log::debug!("Could not remove call directory {}: {}", dir.display(), e);
            }
        } else if !language.reads_stdin() {
            if let Err(e) = fs::remove_file(dir.join(&driver)).await {
                log::debug!("Could not remove driver file {}: {}", driver, e);
            }
        }
        outcome.map(Some)
    }

    fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    async fn close(&self) -> Result<(), CodeExecutorError> {
        let temp_dir = self
            .temp_dir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(temp_dir) = temp_dir {
            log::debug!("Removing local execution directory {}", temp_dir.path().display());
            temp_dir.close()?;
        }
        Ok(())
    }
}
