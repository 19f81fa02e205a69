//! # Worker Registry
//!
//! Closed registry mapping string worker identifiers to invokable handlers,
//! resolved at startup. Steps, pipeline links, batch chunks, and callbacks
//! all dispatch through this registry, so persisted records never need to
//! reconstruct executable code from arbitrary data.

use crate::error::{OrchestrationError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Error returned by a worker's `perform`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerError {
    pub message: String,
    pub retryable: bool,
}

impl WorkerError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkerError {}

/// An invokable unit of work registered under a stable identifier
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier used in job specs and persisted records
    fn id(&self) -> &str;

    async fn perform(&self, args: Value) -> std::result::Result<Value, WorkerError>;
}

impl std::fmt::Debug for dyn Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id()).finish()
    }
}

/// Reference to a completion/failure callback: a registered handler id plus
/// a payload, dispatched through the worker registry rather than stored as
/// a closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRef {
    pub handler: String,
    #[serde(default)]
    pub payload: Value,
}

impl CallbackRef {
    pub fn new(handler: impl Into<String>, payload: Value) -> Self {
        Self {
            handler: handler.into(),
            payload,
        }
    }
}

/// Thread-safe registry of workers keyed by identifier
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own id, replacing any previous binding
    pub fn register(&self, worker: Arc<dyn Worker>) {
        let id = worker.id().to_string();
        debug!(worker_id = %id, "registering worker");
        self.workers.write().insert(id, worker);
    }

    pub fn resolve(&self, worker_id: &str) -> Result<Arc<dyn Worker>> {
        self.workers.read().get(worker_id).cloned().ok_or_else(|| {
            OrchestrationError::WorkerNotRegistered {
                worker_id: worker_id.to_string(),
            }
        })
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.read().contains_key(worker_id)
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Invoke a callback in isolation: resolution failures, worker errors,
    /// and panics are logged and swallowed so they can never destabilize
    /// the coordinator.
    pub async fn invoke_callback(&self, callback: &CallbackRef, outcome: Value) {
        let handler = match self.resolve(&callback.handler) {
            Ok(handler) => handler,
            Err(_) => {
                warn!(handler = %callback.handler, "callback handler not registered, skipping");
                return;
            }
        };

        let mut args = callback.payload.clone();
        if let Value::Object(ref mut map) = args {
            map.insert("outcome".to_string(), outcome);
        } else {
            args = serde_json::json!({ "payload": callback.payload, "outcome": outcome });
        }

        let handler_id = callback.handler.clone();
        let invocation = tokio::spawn(async move { handler.perform(args).await });
        match invocation.await {
            Ok(Ok(_)) => debug!(handler = %handler_id, "callback completed"),
            Ok(Err(e)) => warn!(handler = %handler_id, error = %e, "callback returned error"),
            Err(e) => warn!(handler = %handler_id, error = %e, "callback panicked"),
        }
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.registered_ids())
            .finish()
    }
}
