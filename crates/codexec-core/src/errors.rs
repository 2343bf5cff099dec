//! Error types for the code execution subsystem
//!
//! Failures fall into four groups. Configuration errors are raised while an
//! executor or parser is being constructed and make it unusable. Transient
//! execution errors (spawn failures, timeouts, non-zero exits) are retried by
//! the executor's retry loop. Cancellation bypasses the remaining retries.
//! Missing invocation or session handles are unrecoverable for the call that
//! hit them.

use crate::core_types::CodeExecutionResult;
use std::time::Duration;
use thiserror::Error;

/// Returned when a built-in executor is asked to prepare a request for a model
/// that has no native code execution support.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Code execution is not supported for model '{model}' (supported model families: {supported})")]
pub struct UnsupportedModelError {
    pub model: String,
    pub supported: String,
}

#[derive(Error, Debug)]
pub enum CodeExecutorError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModelError),
    #[error("No invocation or session available to resolve the execution context")]
    MissingSession,
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Code exited with status {exit_code}")]
    NonZeroExit {
        exit_code: i64,
        result: Box<CodeExecutionResult>,
    },
    #[error("Code execution timed out after {timeout:?}")]
    Timeout {
        timeout: Duration,
        result: Box<CodeExecutionResult>,
    },
    #[error("Code execution was cancelled")]
    Cancelled,
    #[error("Container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("{0}")]
    Container(String),
    #[error("I/O error during code execution: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Code execution failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        result: Box<CodeExecutionResult>,
        #[source]
        source: Box<CodeExecutorError>,
    },
}

impl CodeExecutorError {
    /// Wraps a container runtime error with the operation that produced it.
    pub fn container(operation: &str, err: impl std::fmt::Display) -> Self {
        CodeExecutorError::Container(format!("failed to {}: {}", operation, err))
    }

    /// The result captured alongside the error, if the backend produced one.
    pub fn partial_result(&self) -> Option<&CodeExecutionResult> {
        match self {
            CodeExecutorError::NonZeroExit { result, .. }
            | CodeExecutorError::Timeout { result, .. }
            | CodeExecutorError::RetriesExhausted { result, .. } => Some(&**result),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            CodeExecutorError::Timeout { .. } => true,
            CodeExecutorError::RetriesExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
