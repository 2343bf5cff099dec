//! Session collaborators owned by the surrounding conversation system.
//!
//! The code execution subsystem only needs a key/value view of the session
//! state and an invocation handle that points at a session. These are modeled
//! as a trait plus a simple in-memory implementation used by the CLI and tests.

use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};

pub trait SessionState: Send + Sync {
    fn has(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn to_map(&self) -> Map<String, Value>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionState {
    values: RwLock<Map<String, Value>>,
}

impl InMemorySessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

impl SessionState for InMemorySessionState {
    fn has(&self, key: &str) -> bool {
        match self.values.read() {
            Ok(values) => values.contains_key(key),
            Err(poisoned) => poisoned.into_inner().contains_key(key),
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        match self.values.read() {
            Ok(values) => values.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = match self.values.write() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.to_string(), value);
    }

    fn to_map(&self) -> Map<String, Value> {
        match self.values.read() {
            Ok(values) => values.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct Session {
    pub id: String,
    pub state: Arc<dyn SessionState>,
}

impl Session {
    pub fn new(id: impl Into<String>, state: Arc<dyn SessionState>) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }

    pub fn in_memory(id: impl Into<String>) -> Self {
        Self::new(id, Arc::new(InMemorySessionState::new()))
    }
}

/// One agent turn. The invocation id keys error counters and is the fallback
/// execution id.
#[derive(Clone)]
pub struct InvocationContext {
    pub invocation_id: String,
    pub session: Option<Arc<Session>>,
}

impl InvocationContext {
    pub fn new(invocation_id: impl Into<String>, session: Arc<Session>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            session: Some(session),
        }
    }

    pub fn detached(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            session: None,
        }
    }
}
