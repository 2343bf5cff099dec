//! Provider-side code execution.
//!
//! Nothing runs locally; supported models get the provider's code execution
//! tool declared on their requests.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::CodeExecutor;
use crate::config::ExecutionConfig;
use crate::context::InvocationContext;
use crate::core_types::{CodeExecutionInput, CodeExecutionResult, LlmRequest, ToolDeclaration};
use crate::errors::{CodeExecutorError, UnsupportedModelError};

/// Model families whose providers run code natively.
pub const SUPPORTED_MODEL_PREFIXES: &[&str] = &["gemini-2"];

/// Executor that leaves execution to the model provider. It only prepares
/// outgoing requests by declaring the provider's code execution tool.
pub struct BuiltInCodeExecutor {
    config: ExecutionConfig,
}

impl BuiltInCodeExecutor {
    pub fn new(config: ExecutionConfig) -> Result<Self, CodeExecutorError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn validate_model(model: &str) -> Result<(), UnsupportedModelError> {
        let normalized = model.trim().to_lowercase();
        // Provider-qualified names such as "models/gemini-2.0-flash".
        let name = normalized.rsplit('/').next().unwrap_or(&normalized);
        if SUPPORTED_MODEL_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
        {
            return Ok(());
        }
        Err(UnsupportedModelError {
            model: model.to_string(),
            supported: SUPPORTED_MODEL_PREFIXES.join(", "),
        })
    }
}

#[async_trait]
impl CodeExecutor for BuiltInCodeExecutor {
    async fn execute_code(
        &self,
        _cancel: &CancellationToken,
        _invocation: &InvocationContext,
        _input: CodeExecutionInput,
    ) -> Result<Option<CodeExecutionResult>, CodeExecutorError> {
        Ok(None)
    }

    fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn process_llm_request(&self, request: &mut LlmRequest) -> Result<(), CodeExecutorError> {
        Self::validate_model(&request.model)?;
        if !request.tools.contains(&ToolDeclaration::CodeExecution) {
            log::debug!("Declaring native code execution for model '{}'", request.model);
            request.tools.push(ToolDeclaration::CodeExecution);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> BuiltInCodeExecutor {
        BuiltInCodeExecutor::new(ExecutionConfig::default()).unwrap()
    }

    #[test]
    fn test_tool_is_injected_once() {
        let executor = executor();
        let mut request = LlmRequest::new("gemini-2.0-flash");
        request.tools.push(ToolDeclaration::Function {
            name: "search".to_string(),
            description: "Web search".to_string(),
            parameters: serde_json::Value::Null,
        });

        executor.process_llm_request(&mut request).unwrap();
        executor.process_llm_request(&mut request).unwrap();

        let declared = request
            .tools
            .iter()
            .filter(|tool| **tool == ToolDeclaration::CodeExecution)
            .count();
        assert_eq!(declared, 1);
        assert_eq!(request.tools.len(), 2);
    }

    #[test]
    fn test_unsupported_model_is_a_typed_error() {
        let executor = executor();
        let mut request = LlmRequest::new("gpt-4o");

        let err = executor.process_llm_request(&mut request).unwrap_err();
        match err {
            CodeExecutorError::UnsupportedModel(e) => {
                assert_eq!(e.model, "gpt-4o");
                assert_eq!(e.supported, "gemini-2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(request.tools.is_empty());
    }

    #[test]
    fn test_qualified_model_names() {
        assert!(BuiltInCodeExecutor::validate_model("models/gemini-2.5-pro").is_ok());
        assert!(BuiltInCodeExecutor::validate_model("Gemini-2.0-Flash").is_ok());
        assert!(BuiltInCodeExecutor::validate_model("gemini-1.5-pro").is_err());
    }

    #[tokio::test]
    async fn test_execute_code_does_no_local_work() {
        let executor = executor();
        let outcome = executor
            .execute_code(
                &CancellationToken::new(),
                &InvocationContext::detached("inv-1"),
                CodeExecutionInput::new("print(1)"),
            )
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
