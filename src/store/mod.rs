//! # Key-Value Store Collaborator
//!
//! Seam for the external key-value store used to persist workflow, batch,
//! progress, and stats records with per-key retention TTLs. The coordinator
//! is the only writer; readers see whatever snapshot was last mirrored.

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub use memory::InMemoryStore;

/// Atomic get/put/increment with per-key expiry
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value, replacing any previous one. `ttl = None` means the
    /// key never expires.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Atomically add `delta` to an integer key (missing keys start at 0)
    /// and return the new value. The TTL applies on first creation.
    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Key layout helpers shared by the coordinator and queries
pub mod keys {
    use uuid::Uuid;

    pub fn workflow(id: Uuid) -> String {
        format!("workflow:{id}")
    }

    pub fn batch(id: Uuid) -> String {
        format!("batch:{id}")
    }

    pub fn pipeline(id: Uuid) -> String {
        format!("pipeline:{id}")
    }

    pub fn progress(job_id: Uuid) -> String {
        format!("progress:{job_id}")
    }

    pub fn worker_stats(worker: &str) -> String {
        format!("stats:worker:{worker}")
    }
}
