//! # Job Queue Collaborator
//!
//! Seam for the external job queue that actually executes job code and owns
//! retry/backoff. This core submits [`JobSpec`]s, observes [`JobRecord`]
//! snapshots, and subscribes to the lifecycle event feed that drives
//! workflow/pipeline/batch advancement and stats.
//!
//! At-least-once execution is assumed from the collaborator; every consumer
//! of the event feed must tolerate duplicate terminal events.

pub mod memory;

use crate::error::Result;
use crate::job::{JobHandle, JobRecord, JobSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use memory::InMemoryJobQueue;

/// What happened to a job, as reported by the collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    Completed { result: Value },
    Failed { error: String, will_retry: bool },
    Discarded { reason: String },
    Cancelled,
}

/// Timing measurements attached to lifecycle events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMeasurements {
    /// Milliseconds between enqueue and execution start
    pub queue_time_ms: Option<u64>,
    /// Milliseconds between execution start and the terminal event
    pub run_time_ms: Option<u64>,
}

/// One lifecycle event from the collaborator's feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLifecycleEvent {
    pub job_id: Uuid,
    pub worker: String,
    pub queue: String,
    pub kind: JobEventKind,
    pub metadata: HashMap<String, Value>,
    pub measurements: JobMeasurements,
    pub occurred_at: DateTime<Utc>,
}

impl JobLifecycleEvent {
    /// Terminal events resolve the job one way or another
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            JobEventKind::Completed { .. }
                | JobEventKind::Discarded { .. }
                | JobEventKind::Cancelled
        ) || matches!(self.kind, JobEventKind::Failed { will_retry: false, .. })
    }
}

/// The job queue collaborator contract
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit one job; returns a handle or a queue error (e.g. a
    /// uniqueness violation), which propagates unchanged to callers.
    async fn enqueue(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Submit a batch atomically: either every spec is accepted or none is.
    async fn enqueue_batch(&self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>>;

    async fn get_job(&self, job_id: Uuid) -> Result<JobRecord>;

    async fn cancel_job(&self, job_id: Uuid) -> Result<()>;

    /// Move a retryable/discarded job back to available
    async fn retry_job(&self, job_id: Uuid) -> Result<()>;

    /// Subscribe to the lifecycle event feed
    fn subscribe(&self) -> broadcast::Receiver<JobLifecycleEvent>;
}
