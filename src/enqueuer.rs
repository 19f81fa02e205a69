//! # Job Enqueuer
//!
//! Thin validation/translation layer between callers and the job queue
//! collaborator. Every submission path funnels through here: options are
//! validated and normalized against configuration before anything reaches
//! the queue, and collaborator errors propagate to the caller unchanged.

use crate::config::ConductorConfig;
use crate::error::{OrchestrationError, Result};
use crate::job::{JobHandle, JobOptions, JobSpec, JobState};
use crate::queue::JobQueue;
use crate::registry::WorkerRegistry;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Validates and submits jobs to the queue collaborator
#[derive(Clone)]
pub struct JobEnqueuer {
    queue: Arc<dyn JobQueue>,
    registry: Arc<WorkerRegistry>,
    config: Arc<ConductorConfig>,
}

impl JobEnqueuer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<WorkerRegistry>,
        config: Arc<ConductorConfig>,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    /// Validate a spec and normalize defaults in place
    fn validate(&self, spec: &mut JobSpec) -> Result<()> {
        if spec.worker.trim().is_empty() {
            return Err(OrchestrationError::validation("worker id must not be empty"));
        }
        if !self.registry.contains(&spec.worker) {
            return Err(OrchestrationError::WorkerNotRegistered {
                worker_id: spec.worker.clone(),
            });
        }

        let options = &mut spec.options;
        if options.delay.is_some() && options.scheduled_at.is_some() {
            return Err(OrchestrationError::validation(
                "delay and scheduled_at are mutually exclusive",
            ));
        }
        if let Some(priority) = options.priority {
            let max = self.config.queues.max_priority;
            if priority > max {
                return Err(OrchestrationError::validation(format!(
                    "priority {priority} exceeds maximum {max}"
                )));
            }
        }
        if let Some(attempts) = options.max_attempts {
            if attempts == 0 {
                return Err(OrchestrationError::validation(
                    "max_attempts must be at least 1",
                ));
            }
        }
        if let Some(key) = &options.unique_key {
            if key.trim().is_empty() {
                return Err(OrchestrationError::validation(
                    "unique_key must not be empty when present",
                ));
            }
        }
        if options.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(OrchestrationError::validation("tags must not be empty"));
        }

        if options.queue.is_none() {
            options.queue = Some(self.config.queues.default_queue.clone());
        }
        Ok(())
    }

    /// Validate and submit one job
    #[instrument(skip(self, args, options), fields(worker = %worker))]
    pub async fn enqueue(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        options: JobOptions,
    ) -> Result<JobHandle> {
        let mut spec = JobSpec::new(worker.into(), args).with_options(options);
        self.validate(&mut spec)?;
        let handle = self.queue.enqueue(spec).await?;
        debug!(job_id = %handle.job_id, queue = %handle.queue, "job submitted");
        Ok(handle)
    }

    /// Validate every spec, then submit them as one atomic batch. Any
    /// invalid spec fails the whole call with nothing submitted.
    #[instrument(skip(self, specs), fields(count = specs.len()))]
    pub async fn enqueue_many(&self, mut specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
        for spec in &mut specs {
            self.validate(spec)?;
        }
        self.queue.enqueue_batch(specs).await
    }

    /// Enqueue a job that becomes available at an absolute time
    pub async fn schedule(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        at: DateTime<Utc>,
        mut options: JobOptions,
    ) -> Result<JobHandle> {
        options.delay = None;
        options.scheduled_at = Some(at);
        self.enqueue(worker, args, options).await
    }

    /// Enqueue a job that becomes available after a relative delay
    pub async fn schedule_in(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        delay: Duration,
        mut options: JobOptions,
    ) -> Result<JobHandle> {
        options.scheduled_at = None;
        options.delay = Some(delay);
        self.enqueue(worker, args, options).await
    }

    /// Submit a job and poll for its terminal state at the configured
    /// interval until the timeout elapses; `None` falls back to
    /// `wait.default_timeout_ms`. The only blocking operation in the core;
    /// it never waits past the deadline.
    #[instrument(skip(self, args, options), fields(worker = %worker))]
    pub async fn enqueue_and_wait(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        options: JobOptions,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or_else(|| self.config.wait.default_timeout());
        let handle = self.enqueue(worker, args, options).await?;
        self.await_terminal(handle.job_id, timeout).await
    }

    /// Poll an already-submitted job for a terminal state
    pub async fn await_terminal(&self, job_id: Uuid, timeout: Duration) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = self.config.wait.poll_interval();
        loop {
            let record = self.queue.get_job(job_id).await?;
            match record.state {
                JobState::Completed => return Ok(record.result.unwrap_or(Value::Null)),
                JobState::Discarded => {
                    return Err(OrchestrationError::JobDiscarded {
                        job_id,
                        reason: record
                            .discard_reason
                            .unwrap_or_else(|| "unknown".to_string()),
                    })
                }
                JobState::Cancelled => return Err(OrchestrationError::JobCancelled { job_id }),
                _ => {}
            }
            if tokio::time::Instant::now() + interval > deadline {
                return Err(OrchestrationError::Timeout {
                    operation: "enqueue_and_wait".to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}
