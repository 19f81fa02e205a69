//! # Job Data Model
//!
//! Core types describing a single schedulable unit of work: the spec a
//! caller submits, the options attached to it, the handle returned by the
//! queue collaborator, and the snapshot observed through `get_job`.
//!
//! Job lifecycle and retries are owned by the queue collaborator; this core
//! only submits specs and observes `JobRecord` snapshots and lifecycle
//! events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Options attached to a job at enqueue time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Target queue; defaults to the configured default queue
    pub queue: Option<String>,
    /// Priority within the queue, 0 (highest) ..= max_priority
    pub priority: Option<u8>,
    /// Maximum execution attempts before the collaborator discards the job
    pub max_attempts: Option<u32>,
    /// Relative delay before the job becomes available
    #[serde(default, with = "humantime_millis")]
    pub delay: Option<Duration>,
    /// Absolute time the job becomes available; mutually exclusive with `delay`
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Uniqueness key; the collaborator rejects a duplicate active job
    pub unique_key: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

/// Serialize an optional Duration as integer milliseconds
mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// A fully validated job submission: worker identity, arguments, options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub worker: String,
    pub args: Value,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobSpec {
    pub fn new(worker: impl Into<String>, args: Value) -> Self {
        Self {
            worker: worker.into(),
            args,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Handle returned once the queue collaborator accepts a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub queue: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Job lifecycle states as reported by the queue collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its scheduled time
    Scheduled,
    /// Ready to be picked up by a worker
    Available,
    /// Currently running on a worker
    Executing,
    /// Failed but has attempts remaining
    Retryable,
    /// Finished successfully
    Completed,
    /// Exhausted its attempts or was discarded by the collaborator
    Discarded,
    /// Cancelled before completion
    Cancelled,
}

impl JobState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Discarded | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Available => write!(f, "available"),
            Self::Executing => write!(f, "executing"),
            Self::Retryable => write!(f, "retryable"),
            Self::Completed => write!(f, "completed"),
            Self::Discarded => write!(f, "discarded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Snapshot of a job as observed through `JobQueue::get_job`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub worker: String,
    pub args: Value,
    pub queue: String,
    pub state: JobState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub priority: u8,
    pub result: Option<Value>,
    pub discard_reason: Option<String>,
    pub unique_key: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub enqueued_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_state_terminality() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Discarded.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Executing.is_terminal());
        assert!(!JobState::Retryable.is_terminal());
    }

    #[test]
    fn test_job_state_serde_snake_case() {
        let serialized = serde_json::to_string(&JobState::Retryable).unwrap();
        assert_eq!(serialized, "\"retryable\"");
    }

    #[test]
    fn test_job_options_delay_roundtrip() {
        let options = JobOptions {
            delay: Some(Duration::from_millis(2500)),
            ..Default::default()
        };
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["delay"], json!(2500));
        let back: JobOptions = serde_json::from_value(value).unwrap();
        assert_eq!(back.delay, Some(Duration::from_millis(2500)));
    }
}
