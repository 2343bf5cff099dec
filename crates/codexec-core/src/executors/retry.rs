//! Retry loop shared by the local and container executors.
//!
//! Each attempt runs the backend step. Any failure other than cancellation
//! bumps the invocation's error counter and is retried after the configured
//! delay until `max_retries` extra attempts have been spent. Cancellation is
//! checked during the delay and while an attempt is in flight; dropping an
//! in-flight attempt drops its subprocess or exec stream with it.

use crate::config::ExecutionConfig;
use crate::context::CodeExecutorContext;
use crate::core_types::{CodeExecutionResult, ExecutionError, ExecutionErrorKind};
use crate::errors::CodeExecutorError;
use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) struct RetryScope<'a> {
    pub config: &'a ExecutionConfig,
    pub cancel: &'a CancellationToken,
    pub context: &'a CodeExecutorContext,
    pub invocation_id: &'a str,
    pub execution_id: &'a str,
}

pub(crate) async fn execute_with_retry<F, Fut>(
    scope: RetryScope<'_>,
    mut attempt: F,
) -> Result<CodeExecutionResult, CodeExecutorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<CodeExecutionResult, CodeExecutorError>>,
{
    let started = Instant::now();
    let max_attempts = scope.config.max_retries.saturating_add(1);
    let mut last_error = None;

    for attempt_number in 0..max_attempts {
        if attempt_number > 0 {
            tokio::select! {
                _ = scope.cancel.cancelled() => return Err(CodeExecutorError::Cancelled),
                _ = tokio::time::sleep(scope.config.retry_delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => Err(CodeExecutorError::Cancelled),
            outcome = attempt(attempt_number) => outcome,
        };

        match outcome {
            Ok(mut result) => {
                result.duration = started.elapsed();
                result.execution_id = scope.execution_id.to_string();
                result.timestamp = Utc::now();
                scope.context.add_execution_result(&result)?;
                return Ok(result);
            }
            Err(CodeExecutorError::Cancelled) => return Err(CodeExecutorError::Cancelled),
            Err(e) => {
                let errors = scope.context.increment_error_count(scope.invocation_id);
                log::warn!(
                    "Code execution attempt {}/{} failed for execution '{}' ({} error(s) this invocation): {}",
                    attempt_number + 1,
                    max_attempts,
                    scope.execution_id,
                    errors,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    let error = match last_error {
        Some(error) => error,
        None => {
            return Err(CodeExecutorError::Config(
                "Retry loop finished without running an attempt".to_string(),
            ))
        }
    };

    let mut result = error.partial_result().cloned().unwrap_or_default();
    if result.exit_code == 0 {
        result.exit_code = 1;
    }
    result.error = Some(ExecutionError {
        kind: error_kind(&error),
        message: error.to_string(),
    });
    result.duration = started.elapsed();
    result.execution_id = scope.execution_id.to_string();
    result.timestamp = Utc::now();

    Err(CodeExecutorError::RetriesExhausted {
        attempts: max_attempts,
        result: Box::new(result),
        source: Box::new(error),
    })
}

fn error_kind(error: &CodeExecutorError) -> ExecutionErrorKind {
    match error {
        CodeExecutorError::Timeout { .. } => ExecutionErrorKind::Timeout,
        CodeExecutorError::Spawn { .. } => ExecutionErrorKind::Spawn,
        CodeExecutorError::NonZeroExit { .. } => ExecutionErrorKind::NonZeroExit,
        CodeExecutorError::Cancelled => ExecutionErrorKind::Cancelled,
        _ => ExecutionErrorKind::Runtime,
    }
}
