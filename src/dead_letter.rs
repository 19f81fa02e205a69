//! # Dead Letter Handler
//!
//! Captures jobs that exhausted their retry budget onto a dedicated holding
//! queue for manual review, and re-submits held jobs back onto their
//! original queue on request. The holding queue is never worked by normal
//! workers; held jobs just sit there with their failure context attached.

use crate::config::ConductorConfig;
use crate::enqueuer::JobEnqueuer;
use crate::error::{OrchestrationError, Result};
use crate::job::{JobHandle, JobOptions, JobRecord};
use crate::queue::JobQueue;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Metadata keys attached to held jobs
pub mod meta {
    pub const ORIGINAL_QUEUE: &str = "original_queue";
    pub const ORIGINAL_JOB_ID: &str = "original_job_id";
    pub const FAILURE_REASON: &str = "failure_reason";
    pub const DEAD_LETTERED_AT: &str = "dead_lettered_at";
}

/// Moves exhausted jobs to the holding queue and retries them on demand
pub struct DeadLetterHandler {
    enqueuer: JobEnqueuer,
    queue: Arc<dyn JobQueue>,
    config: Arc<ConductorConfig>,
    /// Held job ids with the time they were captured
    held: DashMap<Uuid, DateTime<Utc>>,
}

impl DeadLetterHandler {
    pub fn new(
        enqueuer: JobEnqueuer,
        queue: Arc<dyn JobQueue>,
        config: Arc<ConductorConfig>,
    ) -> Self {
        Self {
            enqueuer,
            queue,
            config,
            held: DashMap::new(),
        }
    }

    /// Re-enqueue a dead job's worker identity, arguments, and failure
    /// context as a new job on the holding queue.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, worker = %job.worker))]
    pub async fn move_to_dead_letter(
        &self,
        job: &JobRecord,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<JobHandle> {
        let reason = reason.into();
        let mut options = JobOptions {
            queue: Some(self.config.queues.dead_letter_queue.clone()),
            ..Default::default()
        };
        options
            .metadata
            .insert(meta::ORIGINAL_QUEUE.to_string(), Value::from(job.queue.clone()));
        options.metadata.insert(
            meta::ORIGINAL_JOB_ID.to_string(),
            Value::from(job.job_id.to_string()),
        );
        options
            .metadata
            .insert(meta::FAILURE_REASON.to_string(), Value::from(reason.clone()));
        options.metadata.insert(
            meta::DEAD_LETTERED_AT.to_string(),
            json!(Utc::now()),
        );

        let handle = self
            .enqueuer
            .enqueue(job.worker.clone(), job.args.clone(), options)
            .await?;
        self.held.insert(handle.job_id, Utc::now());
        info!(
            held_job_id = %handle.job_id,
            reason = %reason,
            "job moved to dead letter queue"
        );
        Ok(handle)
    }

    /// Re-submit a held job onto its original queue and retire the holding
    /// job.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn retry_dead_letter(&self, job_id: Uuid) -> Result<JobHandle> {
        if !self.held.contains_key(&job_id) {
            return Err(OrchestrationError::JobNotFound { job_id });
        }
        let held = self.queue.get_job(job_id).await?;
        let original_queue = held
            .metadata
            .get(meta::ORIGINAL_QUEUE)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.config.queues.default_queue)
            .to_string();

        let options = JobOptions {
            queue: Some(original_queue),
            ..Default::default()
        };
        let handle = self
            .enqueuer
            .enqueue(held.worker.clone(), held.args.clone(), options)
            .await?;

        self.queue.cancel_job(job_id).await?;
        self.held.remove(&job_id);
        info!(retried_as = %handle.job_id, "dead letter retried");
        Ok(handle)
    }

    /// Snapshot of currently held jobs, newest first
    pub async fn list_dead_letters(&self) -> Result<Vec<JobRecord>> {
        let mut records = Vec::with_capacity(self.held.len());
        for entry in self.held.iter() {
            if let Ok(record) = self.queue.get_job(*entry.key()).await {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        Ok(records)
    }
}
