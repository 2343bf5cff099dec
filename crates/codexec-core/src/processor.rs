//! End-to-end code execution over one model turn.
//!
//! The processor sits between the model and an executor: it prepares outgoing
//! requests, finds the first runnable code block in a model response, runs it
//! with the session's pending input files, and rewrites the response so it
//! ends with the executed block followed by the formatted result.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{CodeExecutorContext, InvocationContext};
use crate::core_types::{CodeBlock, CodeExecutionInput, CodeExecutionResult, LlmRequest};
use crate::delimiters::{DelimiterParser, ResultFormatter};
use crate::errors::CodeExecutorError;
use crate::executors::CodeExecutor;

/// Outcome of [`CodeExecutionProcessor::process_model_output`].
#[derive(Debug, Clone, Default)]
pub struct ProcessedOutput {
    /// Model text, truncated right after the executed block when one ran.
    pub text: String,
    pub code_block: Option<CodeBlock>,
    pub result: Option<CodeExecutionResult>,
    pub formatted_result: Option<String>,
    /// Set when a block was found but the invocation had already used up
    /// its error budget.
    pub skipped: bool,
    /// Code executor state to merge into the session store.
    pub state_delta: Map<String, Value>,
}

impl ProcessedOutput {
    /// The text to hand back to the conversation: the (truncated) model text
    /// followed by the formatted result, if any.
    pub fn response(&self) -> String {
        match &self.formatted_result {
            Some(formatted) => format!("{}\n{}", self.text, formatted),
            None => self.text.clone(),
        }
    }
}

pub struct CodeExecutionProcessor {
    executor: Arc<dyn CodeExecutor>,
    parser: DelimiterParser,
    formatter: ResultFormatter,
}

impl CodeExecutionProcessor {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Result<Self, CodeExecutorError> {
        let parser = DelimiterParser::new(executor.code_block_delimiters())?;
        let formatter = ResultFormatter::new(executor.execution_result_delimiters().clone())?;
        Ok(Self {
            executor,
            parser,
            formatter,
        })
    }

    pub fn executor(&self) -> &Arc<dyn CodeExecutor> {
        &self.executor
    }

    pub fn preprocess_request(&self, request: &mut LlmRequest) -> Result<(), CodeExecutorError> {
        self.executor.process_llm_request(request)
    }

    /// First code block in `text`, ignoring blocks that are themselves
    /// execution results.
    pub fn first_code_block(&self, text: &str) -> Option<CodeBlock> {
        let result_start = &self.formatter.delimiters().start;
        self.parser
            .extract_code_blocks(text)
            .into_iter()
            .filter(|block| !text[block.start..].starts_with(result_start.as_str()))
            .min_by_key(|block| block.start)
    }

    /// Error count at which the processor stops executing for an invocation.
    ///
    /// The retry loop counts every failed attempt, so one exhausted call adds
    /// `error_retry_attempts() + 1`. The model gets that many failed turns
    /// before its code blocks are skipped.
    pub fn error_budget(&self) -> u32 {
        let per_call = self.executor.error_retry_attempts().saturating_add(1);
        per_call.saturating_mul(per_call)
    }

    pub async fn process_model_output(
        &self,
        cancel: &CancellationToken,
        invocation: &InvocationContext,
        text: &str,
    ) -> Result<ProcessedOutput, CodeExecutorError> {
        let mut output = ProcessedOutput {
            text: text.to_string(),
            ..Default::default()
        };
        let Some(block) = self.first_code_block(text) else {
            return Ok(output);
        };

        let context = CodeExecutorContext::from_invocation(Some(invocation))
            .ok_or(CodeExecutorError::MissingSession)?;
        let invocation_id = &invocation.invocation_id;

        let errors = context.error_count(invocation_id);
        if errors >= self.error_budget() {
            log::warn!(
                "Skipping code execution for invocation '{}': {} error(s) already recorded",
                invocation_id,
                errors
            );
            output.code_block = Some(block);
            output.skipped = true;
            output.state_delta = context.state_delta();
            return Ok(output);
        }

        let execution_id = if self.executor.is_stateful() {
            match context.execution_id() {
                Some(id) if !id.is_empty() => id,
                _ => Uuid::new_v4().to_string(),
            }
        } else {
            invocation_id.clone()
        };

        let mut input_files = context.input_files();
        if self.executor.optimize_data_file() {
            let processed = context.processed_file_names();
            input_files.retain(|file| !processed.contains(&file.name));
        }

        let mut input = CodeExecutionInput::new(block.code.clone())
            .with_language(block.language.clone())
            .with_execution_id(execution_id);
        input.input_files = input_files;
        // The executor persists through its own view of the session.
        drop(context);

        let result = match self.executor.execute_code(cancel, invocation, input).await {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(e) => match e.partial_result() {
                Some(partial) => {
                    log::warn!("Code execution failed: {}", e);
                    Some(partial.clone())
                }
                None => return Err(e),
            },
        };

        let context = CodeExecutorContext::from_invocation(Some(invocation))
            .ok_or(CodeExecutorError::MissingSession)?;
        if let Some(result) = &result {
            if result.is_success() {
                context.reset_error_count(invocation_id);
            }
            output.text = text[..block.end].to_string();
            output.formatted_result = Some(self.formatter.format_result(result));
        }
        output.code_block = Some(block);
        output.result = result;
        output.state_delta = context.state_delta();
        Ok(output)
    }
}
