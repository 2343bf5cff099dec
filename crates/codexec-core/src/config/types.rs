//! Configuration types for executors
//!
//! `ExecutionConfig` is the policy shared by every executor variant; each
//! backend additionally takes its own statically typed config struct. The
//! `*Settings` types mirror the YAML file layout and convert into the runtime
//! structs once loaded.

use crate::core_types::DelimiterPair;
use crate::errors::CodeExecutorError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONTAINER_WORKING_DIR: &str = "/app";
pub const DEFAULT_IMAGE_TAG: &str = "codexec-sandbox:latest";

pub fn default_code_block_delimiters() -> Vec<DelimiterPair> {
    vec![
        DelimiterPair::new("```tool_code\n", "\n```"),
        DelimiterPair::new("```python\n", "\n```"),
    ]
}

pub fn default_execution_result_delimiters() -> DelimiterPair {
    DelimiterPair::new("```tool_output\n", "\n```")
}

/// Execution policy, fixed for the lifetime of an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub optimize_data_file: bool,
    pub long_running: bool,
    pub stateful: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub code_block_delimiters: Vec<DelimiterPair>,
    pub execution_result_delimiters: DelimiterPair,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            optimize_data_file: false,
            long_running: false,
            stateful: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            code_block_delimiters: default_code_block_delimiters(),
            execution_result_delimiters: default_execution_result_delimiters(),
        }
    }
}

impl ExecutionConfig {
    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), CodeExecutorError> {
        for pair in &self.code_block_delimiters {
            validate_delimiter_pair(pair, "code block")?;
        }
        validate_delimiter_pair(&self.execution_result_delimiters, "execution result")?;
        if self.timeout.is_zero() {
            return Err(CodeExecutorError::Config(
                "Execution timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_delimiter_pair(
    pair: &DelimiterPair,
    kind: &str,
) -> Result<(), CodeExecutorError> {
    if pair.start.is_empty() || pair.end.is_empty() {
        return Err(CodeExecutorError::Config(format!(
            "Invalid {} delimiter pair ({:?}, {:?}): markers must not be empty",
            kind, pair.start, pair.end
        )));
    }
    Ok(())
}

/// Fluent builder for [`ExecutionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimize_data_file(mut self, enabled: bool) -> Self {
        self.config.optimize_data_file = enabled;
        self
    }

    pub fn long_running(mut self, enabled: bool) -> Self {
        self.config.long_running = enabled;
        self
    }

    pub fn stateful(mut self, enabled: bool) -> Self {
        self.config.stateful = enabled;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Replaces the default code block delimiters.
    pub fn code_block_delimiters(mut self, delimiters: Vec<DelimiterPair>) -> Self {
        self.config.code_block_delimiters = delimiters;
        self
    }

    pub fn add_code_block_delimiter(
        mut self,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.config
            .code_block_delimiters
            .push(DelimiterPair::new(start, end));
        self
    }

    pub fn execution_result_delimiters(
        mut self,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.config.execution_result_delimiters = DelimiterPair::new(start, end);
        self
    }

    pub fn build(self) -> Result<ExecutionConfig, CodeExecutorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings for running code directly on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalExecutorConfig {
    /// Must be set explicitly; the local executor refuses to start otherwise.
    #[serde(default)]
    pub allow_unsafe_execution: bool,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default = "default_go")]
    pub go: String,
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_node() -> String {
    "node".to_string()
}

fn default_go() -> String {
    "go".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            allow_unsafe_execution: false,
            working_dir: None,
            python: default_python(),
            node: default_node(),
            go: default_go(),
            shell: default_shell(),
        }
    }
}

impl LocalExecutorConfig {
    pub fn unsafe_enabled() -> Self {
        Self {
            allow_unsafe_execution: true,
            ..Default::default()
        }
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }
}

/// Settings for running code inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerExecutorConfig {
    #[serde(default)]
    pub image: Option<String>,
    /// Directory holding a Dockerfile used to build the image when absent.
    #[serde(default)]
    pub docker_path: Option<PathBuf>,
    #[serde(default = "default_container_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
}

fn default_container_working_dir() -> String {
    DEFAULT_CONTAINER_WORKING_DIR.to_string()
}

fn default_network_mode() -> String {
    "none".to_string()
}

impl Default for ContainerExecutorConfig {
    fn default() -> Self {
        Self {
            image: None,
            docker_path: None,
            working_dir: default_container_working_dir(),
            network_mode: default_network_mode(),
        }
    }
}

impl ContainerExecutorConfig {
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Default::default()
        }
    }

    pub fn with_docker_path(docker_path: impl Into<PathBuf>) -> Self {
        Self {
            docker_path: Some(docker_path.into()),
            ..Default::default()
        }
    }

    /// The image to run, falling back to the fixed tag when only a Dockerfile
    /// directory is configured.
    pub fn resolve_image(&self) -> Result<String, CodeExecutorError> {
        match (&self.image, &self.docker_path) {
            (Some(image), _) if !image.is_empty() => Ok(image.clone()),
            (_, Some(_)) => Ok(DEFAULT_IMAGE_TAG.to_string()),
            _ => Err(CodeExecutorError::Config(
                "Either an image or a Dockerfile directory (docker_path) must be set".to_string(),
            )),
        }
    }
}

/// Which executor a settings file selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorBackend {
    #[serde(alias = "built-in", alias = "built_in")]
    Builtin,
    #[default]
    Local,
    #[serde(alias = "container")]
    Docker,
}

/// File representation of [`ExecutionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub optimize_data_file: bool,
    #[serde(default)]
    pub long_running: bool,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default)]
    pub code_block_delimiters: Option<Vec<DelimiterPair>>,
    #[serde(default)]
    pub execution_result_delimiters: Option<DelimiterPair>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            optimize_data_file: false,
            long_running: false,
            stateful: false,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout: default_timeout_secs(),
            code_block_delimiters: None,
            execution_result_delimiters: None,
        }
    }
}

impl ExecutionSettings {
    pub fn to_execution_config(&self) -> Result<ExecutionConfig, CodeExecutorError> {
        let mut builder = ExecutionConfig::builder()
            .optimize_data_file(self.optimize_data_file)
            .long_running(self.long_running)
            .stateful(self.stateful)
            .max_retries(self.max_retries)
            .retry_delay(Duration::from_millis(self.retry_delay_ms))
            .timeout(Duration::from_secs(self.timeout));

        if let Some(delimiters) = &self.code_block_delimiters {
            builder = builder.code_block_delimiters(delimiters.clone());
        }
        if let Some(pair) = &self.execution_result_delimiters {
            builder = builder.execution_result_delimiters(pair.start.clone(), pair.end.clone());
        }
        builder.build()
    }
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecutionSettings {
    #[serde(default)]
    pub backend: ExecutorBackend,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub local: LocalExecutorConfig,
    #[serde(default)]
    pub container: ContainerExecutorConfig,
}
