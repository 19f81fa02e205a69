//! In-process key-value store backed by a concurrent map with lazy expiry.
//! Suitable for embedded deployments and tests; a networked store plugs in
//! through the same [`KeyValueStore`] trait.

use super::KeyValueStore;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Concurrent in-memory store with per-key TTLs
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Expiry is otherwise lazy on access.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::from(0i64),
            expires_at: ttl.map(|t| Instant::now() + t),
        });
        if entry.is_expired(Instant::now()) {
            entry.value = Value::from(0i64);
            entry.expires_at = ttl.map(|t| Instant::now() + t);
        }
        let current = entry.value.as_i64().unwrap_or(0);
        let next = current + delta;
        entry.value = Value::from(next);
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
