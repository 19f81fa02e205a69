//! In-process job queue collaborator.
//!
//! Keeps the whole job table in a concurrent map and exposes manual drive
//! methods (`start_job`, `complete_job`, `fail_job`) so embedding code and
//! tests can execute jobs however they like while the orchestration core
//! observes the same lifecycle feed it would get from a networked queue.

use super::{JobEventKind, JobLifecycleEvent, JobMeasurements, JobQueue};
use crate::error::{OrchestrationError, Result};
use crate::job::{JobHandle, JobRecord, JobSpec, JobState};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredJob {
    record: JobRecord,
    started_at: Option<Instant>,
    enqueued_instant: Instant,
}

/// In-memory queue with a lifecycle broadcast feed
pub struct InMemoryJobQueue {
    jobs: DashMap<Uuid, StoredJob>,
    unique_index: DashMap<String, Uuid>,
    events: broadcast::Sender<JobLifecycleEvent>,
}

impl InMemoryJobQueue {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            jobs: DashMap::new(),
            unique_index: DashMap::new(),
            events,
        }
    }

    fn emit(&self, record: &JobRecord, kind: JobEventKind, measurements: JobMeasurements) {
        let event = JobLifecycleEvent {
            job_id: record.job_id,
            worker: record.worker.clone(),
            queue: record.queue.clone(),
            kind,
            metadata: record.metadata.clone(),
            measurements,
            occurred_at: Utc::now(),
        };
        // No subscribers is acceptable
        let _ = self.events.send(event);
    }

    fn check_unique(&self, spec: &JobSpec) -> Result<()> {
        if let Some(key) = &spec.options.unique_key {
            if let Some(existing) = self.unique_index.get(key) {
                if let Some(job) = self.jobs.get(existing.value()) {
                    if !job.record.state.is_terminal() {
                        return Err(OrchestrationError::queue(
                            "enqueue",
                            format!("uniqueness violation: active job exists for key '{key}'"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn insert(&self, spec: JobSpec) -> JobHandle {
        let job_id = Uuid::new_v4();
        let now = Utc::now();
        let options = spec.options;
        let scheduled_at = options
            .scheduled_at
            .or_else(|| options.delay.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default()));
        let state = match scheduled_at {
            Some(at) if at > now => JobState::Scheduled,
            _ => JobState::Available,
        };
        let queue = options.queue.unwrap_or_else(|| "default".to_string());
        let record = JobRecord {
            job_id,
            worker: spec.worker,
            args: spec.args,
            queue: queue.clone(),
            state,
            attempt: 0,
            max_attempts: options.max_attempts.unwrap_or(1),
            priority: options.priority.unwrap_or(0),
            result: None,
            discard_reason: None,
            unique_key: options.unique_key.clone(),
            tags: options.tags,
            metadata: options.metadata,
            enqueued_at: now,
            scheduled_at,
            completed_at: None,
        };
        if let Some(key) = options.unique_key {
            self.unique_index.insert(key, job_id);
        }
        debug!(job_id = %job_id, queue = %queue, worker = %record.worker, "job enqueued");
        self.jobs.insert(
            job_id,
            StoredJob {
                record,
                started_at: None,
                enqueued_instant: Instant::now(),
            },
        );
        JobHandle {
            job_id,
            queue,
            enqueued_at: now,
        }
    }

    fn release_unique(&self, record: &JobRecord) {
        if let Some(key) = &record.unique_key {
            self.unique_index.remove(key);
        }
    }

    /// Mark a job executing and emit the started event
    pub fn start_job(&self, job_id: Uuid) -> Result<()> {
        let (record, measurements) = {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestrationError::JobNotFound { job_id })?;
            if job.record.state.is_terminal() {
                return Err(OrchestrationError::InvalidTransition {
                    entity: "job".to_string(),
                    from: job.record.state.to_string(),
                    requested: "executing".to_string(),
                });
            }
            job.record.state = JobState::Executing;
            job.record.attempt += 1;
            job.started_at = Some(Instant::now());
            let queue_time = job.enqueued_instant.elapsed().as_millis() as u64;
            (
                job.record.clone(),
                JobMeasurements {
                    queue_time_ms: Some(queue_time),
                    run_time_ms: None,
                },
            )
        };
        self.emit(&record, JobEventKind::Started, measurements);
        Ok(())
    }

    /// Complete a job successfully with a result payload
    pub fn complete_job(&self, job_id: Uuid, result: Value) -> Result<()> {
        let (record, measurements) = {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestrationError::JobNotFound { job_id })?;
            if job.record.state.is_terminal() {
                return Ok(()); // duplicate terminal transition, at-least-once
            }
            job.record.state = JobState::Completed;
            job.record.result = Some(result.clone());
            job.record.completed_at = Some(Utc::now());
            let run_time = job.started_at.map(|s| s.elapsed().as_millis() as u64);
            (
                job.record.clone(),
                JobMeasurements {
                    queue_time_ms: None,
                    run_time_ms: run_time,
                },
            )
        };
        self.release_unique(&record);
        self.emit(&record, JobEventKind::Completed { result }, measurements);
        Ok(())
    }

    /// Fail the current attempt. Moves to retryable while attempts remain,
    /// otherwise discards the job.
    pub fn fail_job(&self, job_id: Uuid, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let (record, kind, measurements) = {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestrationError::JobNotFound { job_id })?;
            if job.record.state.is_terminal() {
                return Ok(());
            }
            let run_time = job.started_at.map(|s| s.elapsed().as_millis() as u64);
            let will_retry = job.record.attempt < job.record.max_attempts;
            let kind = if will_retry {
                job.record.state = JobState::Retryable;
                JobEventKind::Failed {
                    error: error.clone(),
                    will_retry: true,
                }
            } else {
                job.record.state = JobState::Discarded;
                job.record.discard_reason = Some(error.clone());
                job.record.completed_at = Some(Utc::now());
                JobEventKind::Discarded { reason: error }
            };
            (
                job.record.clone(),
                kind,
                JobMeasurements {
                    queue_time_ms: None,
                    run_time_ms: run_time,
                },
            )
        };
        if record.state == JobState::Discarded {
            self.release_unique(&record);
        }
        self.emit(&record, kind, measurements);
        Ok(())
    }

    /// Snapshot of every job on a queue, newest first
    pub fn jobs_on_queue(&self, queue: &str) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .iter()
            .filter(|j| j.record.queue == queue)
            .map(|j| j.record.clone())
            .collect();
        records.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        records
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<JobHandle> {
        self.check_unique(&spec)?;
        Ok(self.insert(spec))
    }

    async fn enqueue_batch(&self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
        // Validate the whole batch before inserting anything
        for spec in &specs {
            self.check_unique(spec)?;
        }
        Ok(specs.into_iter().map(|spec| self.insert(spec)).collect())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<JobRecord> {
        self.jobs
            .get(&job_id)
            .map(|j| j.record.clone())
            .ok_or(OrchestrationError::JobNotFound { job_id })
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let record = {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestrationError::JobNotFound { job_id })?;
            if job.record.state.is_terminal() {
                return Ok(());
            }
            job.record.state = JobState::Cancelled;
            job.record.completed_at = Some(Utc::now());
            job.record.clone()
        };
        self.release_unique(&record);
        self.emit(&record, JobEventKind::Cancelled, JobMeasurements::default());
        Ok(())
    }

    async fn retry_job(&self, job_id: Uuid) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestrationError::JobNotFound { job_id })?;
        match job.record.state {
            JobState::Retryable | JobState::Discarded => {
                job.record.state = JobState::Available;
                job.record.discard_reason = None;
                job.record.completed_at = None;
                Ok(())
            }
            other => Err(OrchestrationError::InvalidTransition {
                entity: "job".to_string(),
                from: other.to_string(),
                requested: "available".to_string(),
            }),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<JobLifecycleEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(worker: &str) -> JobSpec {
        JobSpec::new(worker, json!({}))
    }

    #[tokio::test]
    async fn test_enqueue_then_complete_emits_events() {
        let queue = InMemoryJobQueue::default();
        let mut rx = queue.subscribe();
        let handle = queue.enqueue(spec("mailer")).await.unwrap();

        queue.start_job(handle.job_id).unwrap();
        queue.complete_job(handle.job_id, json!({"sent": true})).unwrap();

        let started = rx.recv().await.unwrap();
        assert!(matches!(started.kind, JobEventKind::Started));
        let completed = rx.recv().await.unwrap();
        assert!(matches!(completed.kind, JobEventKind::Completed { .. }));
        assert!(completed.is_terminal());

        let record = queue.get_job(handle.job_id).await.unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.result.unwrap()["sent"], true);
    }

    #[tokio::test]
    async fn test_uniqueness_violation_rejected_while_active() {
        let queue = InMemoryJobQueue::default();
        let mut unique = spec("mailer");
        unique.options.unique_key = Some("mail:42".to_string());

        let handle = queue.enqueue(unique.clone()).await.unwrap();
        let err = queue.enqueue(unique.clone()).await.unwrap_err();
        assert!(err.to_string().contains("uniqueness violation"));

        // Once terminal, the key is free again
        queue.start_job(handle.job_id).unwrap();
        queue.complete_job(handle.job_id, json!(null)).unwrap();
        assert!(queue.enqueue(unique).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_enqueue_is_atomic() {
        let queue = InMemoryJobQueue::default();
        let mut held = spec("a");
        held.options.unique_key = Some("k".to_string());
        queue.enqueue(held.clone()).await.unwrap();

        let specs = vec![spec("b"), held];
        assert!(queue.enqueue_batch(specs).await.is_err());
        // Only the original unique job exists
        assert_eq!(queue.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_exhausting_attempts_discards() {
        let queue = InMemoryJobQueue::default();
        let mut retried = spec("flaky");
        retried.options.max_attempts = Some(2);
        let handle = queue.enqueue(retried).await.unwrap();

        queue.start_job(handle.job_id).unwrap();
        queue.fail_job(handle.job_id, "first failure").unwrap();
        let record = queue.get_job(handle.job_id).await.unwrap();
        assert_eq!(record.state, JobState::Retryable);

        queue.start_job(handle.job_id).unwrap();
        queue.fail_job(handle.job_id, "second failure").unwrap();
        let record = queue.get_job(handle.job_id).await.unwrap();
        assert_eq!(record.state, JobState::Discarded);
        assert_eq!(record.discard_reason.as_deref(), Some("second failure"));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let queue = InMemoryJobQueue::default();
        let handle = queue.enqueue(spec("w")).await.unwrap();
        queue.cancel_job(handle.job_id).await.unwrap();
        queue.cancel_job(handle.job_id).await.unwrap();
        let record = queue.get_job(handle.job_id).await.unwrap();
        assert_eq!(record.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_delayed_job_is_scheduled() {
        let queue = InMemoryJobQueue::default();
        let mut delayed = spec("later");
        delayed.options.delay = Some(std::time::Duration::from_secs(60));
        let handle = queue.enqueue(delayed).await.unwrap();
        let record = queue.get_job(handle.job_id).await.unwrap();
        assert_eq!(record.state, JobState::Scheduled);
        assert!(record.scheduled_at.is_some());
    }
}
