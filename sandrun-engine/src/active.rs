//! The active-execution registry.
//!
//! A process-wide map from execution id to the live container handle, used to
//! cancel executions from outside the engine task that owns them. The lock is
//! held only for the map operation itself, never across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use sandrun_docker::Container;

/// The registry of currently-running executions.
#[derive(Clone, Debug, Default)]
pub struct ActiveExecutions {
    /// The map, keyed by execution id.
    inner: Arc<Mutex<HashMap<String, Container>>>,
}

impl ActiveExecutions {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container for an execution id.
    pub fn insert(&self, id: impl Into<String>, container: Container) {
        self.inner
            .lock()
            .expect("active-execution registry lock poisoned")
            .insert(id.into(), container);
    }

    /// Removes and returns the container for an execution id, if present.
    pub fn remove(&self, id: &str) -> Option<Container> {
        self.inner
            .lock()
            .expect("active-execution registry lock poisoned")
            .remove(id)
    }

    /// Whether an execution id is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("active-execution registry lock poisoned")
            .contains_key(id)
    }

    /// The number of registered executions.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("active-execution registry lock poisoned")
            .len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
