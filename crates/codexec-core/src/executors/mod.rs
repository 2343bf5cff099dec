//! Code execution backends.
//!
//! Every backend implements [`CodeExecutor`]: the built-in variant defers to the
//! model provider's native tool, the local variant runs code on the host, and
//! the container variant runs it inside a throwaway (or, when stateful,
//! per-execution) container. The local and container variants share the
//! language dispatch table, the output file rules and the retry loop.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{CodeExecutionSettings, ExecutionConfig, ExecutorBackend};
use crate::context::{CodeExecutorContext, InvocationContext};
use crate::core_types::{CodeExecutionInput, CodeExecutionResult, DelimiterPair, LlmRequest};
use crate::errors::CodeExecutorError;

pub mod builtin;
pub mod docker;
pub mod files;
pub mod language;
pub mod local;
pub(crate) mod retry;

pub use builtin::BuiltInCodeExecutor;
pub use docker::ContainerCodeExecutor;
pub use language::Language;
pub use local::LocalCodeExecutor;

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Runs one snippet. `Ok(None)` means execution happens elsewhere (the
    /// built-in variant). Exhausted retries surface as
    /// [`CodeExecutorError::RetriesExhausted`] carrying the partial result.
    async fn execute_code(
        &self,
        cancel: &CancellationToken,
        invocation: &InvocationContext,
        input: CodeExecutionInput,
    ) -> Result<Option<CodeExecutionResult>, CodeExecutorError>;

    fn config(&self) -> &ExecutionConfig;

    fn is_stateful(&self) -> bool {
        self.config().stateful
    }

    fn is_long_running(&self) -> bool {
        self.config().long_running
    }

    fn optimize_data_file(&self) -> bool {
        self.config().optimize_data_file
    }

    fn error_retry_attempts(&self) -> u32 {
        self.config().max_retries
    }

    fn code_block_delimiters(&self) -> &[DelimiterPair] {
        &self.config().code_block_delimiters
    }

    fn execution_result_delimiters(&self) -> &DelimiterPair {
        &self.config().execution_result_delimiters
    }

    /// Hook to adjust an outgoing model request before it is sent.
    fn process_llm_request(&self, _request: &mut LlmRequest) -> Result<(), CodeExecutorError> {
        Ok(())
    }

    /// Releases everything the executor owns (temporary directories,
    /// containers, runtime clients).
    async fn close(&self) -> Result<(), CodeExecutorError> {
        Ok(())
    }
}

/// Picks the execution id for a call and records it on the context: the
/// input's id, else the context's current id, else the invocation id.
pub(crate) fn resolve_execution_id(
    context: &CodeExecutorContext,
    invocation: &InvocationContext,
    input: &CodeExecutionInput,
) -> String {
    let execution_id = if !input.execution_id.is_empty() {
        input.execution_id.clone()
    } else {
        context
            .execution_id()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| invocation.invocation_id.clone())
    };
    context.set_execution_id(execution_id.clone());
    execution_id
}

/// Builds the executor selected by a settings document.
pub async fn create_executor(
    settings: &CodeExecutionSettings,
) -> Result<Arc<dyn CodeExecutor>, CodeExecutorError> {
    let config = settings.execution.to_execution_config()?;
    match settings.backend {
        ExecutorBackend::Builtin => Ok(Arc::new(BuiltInCodeExecutor::new(config)?)),
        ExecutorBackend::Local => Ok(Arc::new(LocalCodeExecutor::new(
            config,
            settings.local.clone(),
        )?)),
        ExecutorBackend::Docker => Ok(Arc::new(
            ContainerCodeExecutor::new(config, settings.container.clone()).await?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Session;

    #[test]
    fn test_execution_id_resolution_order() {
        let invocation = InvocationContext::new("inv-1", Arc::new(Session::in_memory("s-1")));
        let context = CodeExecutorContext::from_invocation(Some(&invocation)).unwrap();

        let id = resolve_execution_id(&context, &invocation, &CodeExecutionInput::new("x"));
        assert_eq!(id, "inv-1");
        assert_eq!(context.execution_id().as_deref(), Some("inv-1"));

        context.set_execution_id("exec-ctx");
        let id = resolve_execution_id(&context, &invocation, &CodeExecutionInput::new("x"));
        assert_eq!(id, "exec-ctx");

        let input = CodeExecutionInput::new("x").with_execution_id("exec-input");
        let id = resolve_execution_id(&context, &invocation, &input);
        assert_eq!(id, "exec-input");
        assert_eq!(context.execution_id().as_deref(), Some("exec-input"));
    }

    #[tokio::test]
    async fn test_factory_refuses_local_without_opt_in() {
        let settings = CodeExecutionSettings::default();
        let result = create_executor(&settings).await;
        assert!(matches!(result, Err(CodeExecutorError::Config(_))));
    }

    #[tokio::test]
    async fn test_factory_builds_builtin() {
        let settings = CodeExecutionSettings {
            backend: ExecutorBackend::Builtin,
            ..Default::default()
        };
        let executor = create_executor(&settings).await.unwrap();
        assert!(!executor.is_stateful());
        assert_eq!(executor.error_retry_attempts(), 2);
    }
}
