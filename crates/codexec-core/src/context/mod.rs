//! Execution context store and the session collaborators it is backed by.

pub mod executor_context;
pub mod session;

pub use executor_context::{CodeExecutorContext, CodeExecutorState, CONTEXT_KEY};
pub use session::{InMemorySessionState, InvocationContext, Session, SessionState};
