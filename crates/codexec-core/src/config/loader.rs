//! Settings loader for YAML files with environment resolution
//!
//! Values written as `${VAR}` anywhere in the document are replaced by the
//! value of the environment variable before parsing. Unknown variables are a
//! configuration error rather than silently becoming empty strings.

use crate::config::types::CodeExecutionSettings;
use crate::errors::CodeExecutorError;
use regex::Regex;
use std::env;
use std::path::Path;
use tokio::fs;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CodeExecutionSettings, CodeExecutorError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            CodeExecutorError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load settings from a YAML string
    pub fn from_str(content: &str) -> Result<CodeExecutionSettings, CodeExecutorError> {
        let resolved = Self::resolve_env_vars(content)?;
        let settings: CodeExecutionSettings = serde_yaml::from_str(&resolved).map_err(|e| {
            CodeExecutorError::Config(format!("Failed to parse YAML config: {}", e))
        })?;

        // Surfaces delimiter and timeout problems at load time.
        settings.execution.to_execution_config()?;
        Ok(settings)
    }

    fn resolve_env_vars(content: &str) -> Result<String, CodeExecutorError> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| CodeExecutorError::Config(e.to_string()))?;

        let mut missing = Vec::new();
        let resolved = re.replace_all(content, |caps: &regex::Captures| {
            let name = &caps[1];
            match env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        });

        if !missing.is_empty() {
            return Err(CodeExecutorError::Config(format!(
                "Environment variable(s) referenced in config are not set: {}",
                missing.join(", ")
            )));
        }
        Ok(resolved.into_owned())
    }
}
