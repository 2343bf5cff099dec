//! Per-session code execution state.
//!
//! All fields live in a typed [`CodeExecutorState`] that is serialized under a
//! single reserved key of the session state after every mutation, so the data
//! survives across invocations of the same session. Accessors are individually
//! serialized by a mutex. Two contexts resolved over the same session share
//! nothing but the backing store, and the last writer wins there.

use crate::context::session::{InvocationContext, SessionState};
use crate::core_types::{CodeExecutionFile, CodeExecutionResult};
use crate::errors::CodeExecutorError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Reserved top-level session state key.
pub const CONTEXT_KEY: &str = "_code_executor_context";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExecutorState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub processed_file_names: Vec<String>,
    #[serde(default)]
    pub input_files: Vec<CodeExecutionFile>,
    #[serde(default)]
    pub error_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub execution_results: BTreeMap<String, Vec<CodeExecutionResult>>,
}

pub struct CodeExecutorContext {
    session_state: Arc<dyn SessionState>,
    state: Mutex<CodeExecutorState>,
}

impl CodeExecutorContext {
    pub fn new(session_state: Arc<dyn SessionState>) -> Self {
        let state = Self::load(session_state.as_ref());
        Self {
            session_state,
            state: Mutex::new(state),
        }
    }

    /// Resolves the context for an invocation. Returns `None` when there is no
    /// invocation or it carries no session; callers must not execute then.
    pub fn from_invocation(invocation: Option<&InvocationContext>) -> Option<Self> {
        let session = invocation?.session.as_ref()?;
        Some(Self::new(session.state.clone()))
    }

    fn load(session_state: &dyn SessionState) -> CodeExecutorState {
        let Some(value) = session_state.get(CONTEXT_KEY) else {
            return CodeExecutorState::default();
        };
        match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                log::warn!(
                    "Discarding malformed code executor state under '{}': {}",
                    CONTEXT_KEY,
                    e
                );
                CodeExecutorState::default()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CodeExecutorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<R>(&self, mutate: impl FnOnce(&mut CodeExecutorState) -> R) -> R {
        let mut state = self.lock();
        let output = mutate(&mut state);
        match serde_json::to_value(&*state) {
            Ok(value) => self.session_state.set(CONTEXT_KEY, value),
            Err(e) => log::error!("Failed to persist code executor state: {}", e),
        }
        output
    }

    pub fn execution_id(&self) -> Option<String> {
        self.lock().execution_id.clone()
    }

    pub fn set_execution_id(&self, execution_id: impl Into<String>) {
        let execution_id = execution_id.into();
        self.update(|state| state.execution_id = Some(execution_id));
    }

    pub fn processed_file_names(&self) -> Vec<String> {
        self.lock().processed_file_names.clone()
    }

    /// Appends names in order. Duplicates are kept.
    pub fn add_processed_file_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return;
        }
        self.update(|state| state.processed_file_names.extend(names));
    }

    pub fn input_files(&self) -> Vec<CodeExecutionFile> {
        self.lock().input_files.clone()
    }

    pub fn add_input_files(&self, files: impl IntoIterator<Item = CodeExecutionFile>) {
        let files: Vec<CodeExecutionFile> = files.into_iter().collect();
        if files.is_empty() {
            return;
        }
        self.update(|state| state.input_files.extend(files));
    }

    /// Clears the pending files together with the processed names; "processed"
    /// only means something relative to a pending batch.
    pub fn clear_input_files(&self) {
        self.update(|state| {
            state.input_files.clear();
            state.processed_file_names.clear();
        });
    }

    pub fn error_count(&self, invocation_id: &str) -> u32 {
        self.lock()
            .error_counts
            .get(invocation_id)
            .copied()
            .unwrap_or(0)
    }

    /// Increments and returns the new count.
    pub fn increment_error_count(&self, invocation_id: &str) -> u32 {
        self.update(|state| {
            let count = state
                .error_counts
                .entry(invocation_id.to_string())
                .or_insert(0);
            *count = count.saturating_add(1);
            *count
        })
    }

    pub fn reset_error_count(&self, invocation_id: &str) {
        self.update(|state| {
            state.error_counts.remove(invocation_id);
        });
    }

    /// Appends to the history of the result's execution id, or of the
    /// context's current id when the result carries none.
    pub fn add_execution_result(&self, result: &CodeExecutionResult) -> Result<(), CodeExecutorError> {
        self.update(|state| {
            let execution_id = if result.execution_id.is_empty() {
                state.execution_id.clone().filter(|id| !id.is_empty())
            } else {
                Some(result.execution_id.clone())
            };
            let Some(execution_id) = execution_id else {
                return Err(CodeExecutorError::Config(
                    "Cannot record an execution result without an execution id".to_string(),
                ));
            };

            let mut recorded = result.clone();
            recorded.execution_id = execution_id.clone();
            state
                .execution_results
                .entry(execution_id)
                .or_default()
                .push(recorded);
            Ok(())
        })
    }

    pub fn execution_results(&self, execution_id: &str) -> Vec<CodeExecutionResult> {
        self.lock()
            .execution_results
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> CodeExecutorState {
        self.lock().clone()
    }

    /// The reserved key and its current value, ready to merge into the
    /// session's authoritative state.
    pub fn state_delta(&self) -> Map<String, Value> {
        let state = self.lock();
        let mut delta = Map::new();
        match serde_json::to_value(&*state) {
            Ok(value) => {
                delta.insert(CONTEXT_KEY.to_string(), value);
            }
            Err(e) => log::error!("Failed to serialize code executor state: {}", e),
        }
        delta
    }
}
