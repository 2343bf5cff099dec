//! Code execution subsystem for AI agents.
//!
//! Model responses carry code between delimiter markers. This crate finds that
//! code, runs it through a pluggable executor and renders the outcome back into
//! conversation text, keeping per-session execution state in the session's
//! key/value store.
//!
//! # Architecture Overview
//!
//! - **Delimiters**: code block extraction and result formatting over plain text
//! - **Execution context**: typed per-session state (execution id, staged files, error counters, result history)
//! - **Executors**: the `CodeExecutor` trait with built-in, local and container backends sharing one retry policy
//! - **Processor**: the end-to-end flow from model output to formatted result
//! - **Configuration**: typed execution policy and backend settings, loadable from YAML

pub mod config;
pub mod context;
pub mod core_types;
pub mod delimiters;
pub mod errors;
pub mod executors;
pub mod processor;

pub use config::*;
pub use context::{CodeExecutorContext, InMemorySessionState, InvocationContext, Session, SessionState};
pub use core_types::*;
pub use delimiters::{DelimiterParser, ResultFormatter};
pub use errors::{CodeExecutorError, UnsupportedModelError};
pub use executors::{
    create_executor, BuiltInCodeExecutor, CodeExecutor, ContainerCodeExecutor, LocalCodeExecutor,
};
pub use processor::{CodeExecutionProcessor, ProcessedOutput};
