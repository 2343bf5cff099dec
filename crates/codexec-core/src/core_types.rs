//! Data types exchanged between callers and code executors
//!
//! Inputs are created fresh by the caller for every call and results are
//! produced exactly once per call. Results are appended to the execution
//! history of a session and never mutated afterwards, so everything here is
//! plain owned data that serializes into the session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A file staged into an execution or produced by one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecutionFile {
    pub name: String,
    pub content: Vec<u8>,
    pub size: u64,
}

impl CodeExecutionFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len() as u64,
            content,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeExecutionInput {
    /// Correlates calls that belong to one stateful session. Empty means
    /// "use the context's id, falling back to the invocation id".
    pub execution_id: String,
    pub code: String,
    pub language: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub input_files: Vec<CodeExecutionFile>,
}

impl CodeExecutionInput {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_input_file(mut self, file: CodeExecutionFile) -> Self {
        self.input_files.push(file);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    Spawn,
    NonZeroExit,
    Runtime,
    Cancelled,
}

/// Structured error attached to a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default)]
    pub output_files: Vec<CodeExecutionFile>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl CodeExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// The text a conversation should see: stdout on success, otherwise
    /// stderr followed by the error message.
    pub fn primary_content(&self) -> String {
        if self.is_success() {
            return self.stdout.clone();
        }

        let mut parts = Vec::new();
        if !self.stderr.is_empty() {
            parts.push(self.stderr.trim_end().to_string());
        }
        if let Some(error) = &self.error {
            if !error.message.is_empty() {
                parts.push(error.message.clone());
            }
        }
        parts.join("\n")
    }
}

/// A code block found in model output. Offsets are byte positions of the whole
/// match (markers included) in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
    pub start: usize,
    pub end: usize,
}

/// A (start marker, end marker) pair locating an embedded block in text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelimiterPair {
    pub start: String,
    pub end: String,
}

impl DelimiterPair {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Tool declarations attached to a model request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDeclaration {
    /// The provider's native code execution tool.
    CodeExecution,
    Function {
        name: String,
        description: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
}

/// The part of an outgoing model request the executors may touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tools: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_size_follows_content() {
        let file = CodeExecutionFile::new("data.csv", "a,b\n1,2\n");
        assert_eq!(file.size, 8);
    }

    #[test]
    fn test_primary_content_on_failure_joins_stderr_and_error() {
        let result = CodeExecutionResult {
            stdout: "partial".to_string(),
            stderr: "Traceback ...\n".to_string(),
            exit_code: 1,
            error: Some(ExecutionError {
                kind: ExecutionErrorKind::NonZeroExit,
                message: "exit status 1".to_string(),
            }),
            ..Default::default()
        };

        assert!(!result.is_success());
        assert_eq!(result.primary_content(), "Traceback ...\nexit status 1");
    }

    #[test]
    fn test_primary_content_on_success_is_stdout() {
        let result = CodeExecutionResult {
            stdout: "42\n".to_string(),
            stderr: "warning".to_string(),
            ..Default::default()
        };
        assert_eq!(result.primary_content(), "42\n");
    }
}
