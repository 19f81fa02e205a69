//! # Conductor Facade
//!
//! Single entry point wiring the component set together: worker registry,
//! queue collaborator, key-value store, event publisher, enqueuer, dead
//! letter handler, and the serialized coordinator. Every public operation
//! from the orchestration surface lives here.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_core::{Conductor, WorkflowSpec, StepDefinition};
//! use serde_json::json;
//!
//! # async fn example() -> conductor_core::Result<()> {
//! let conductor = Conductor::builder().build();
//! // register workers, then orchestrate
//! let spec = WorkflowSpec::new(
//!     "provision_account",
//!     vec![StepDefinition::new("create_user", json!({"email": "a@b.c"}))],
//! );
//! let workflow_id = conductor.start_workflow(spec).await?;
//! let report = conductor.get_workflow_status(workflow_id).await?;
//! # Ok(())
//! # }
//! ```

use crate::batch::{BatchOptions, BatchStatusReport, ChunkOutcome};
use crate::config::ConductorConfig;
use crate::coordinator::{Coordinator, CoordinatorDeps, CoordinatorHandle};
use crate::dead_letter::DeadLetterHandler;
use crate::enqueuer::JobEnqueuer;
use crate::error::Result;
use crate::events::{EventPublisher, PublishedEvent};
use crate::job::{JobHandle, JobOptions, JobRecord, JobSpec};
use crate::pipeline::{PipelineEnvelope, PipelineLink, PipelineOptions};
use crate::progress::ProgressRecord;
use crate::queue::{InMemoryJobQueue, JobQueue};
use crate::registry::{Worker, WorkerRegistry};
use crate::stats::{ErrorStatsSnapshot, StatsSnapshot, WorkerPerformanceSnapshot};
use crate::store::{InMemoryStore, KeyValueStore};
use crate::workflow::{WorkflowSpec, WorkflowStatusReport};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Builder for [`Conductor`]; unset collaborators fall back to the
/// in-process implementations.
#[derive(Default)]
pub struct ConductorBuilder {
    config: Option<ConductorConfig>,
    queue: Option<Arc<dyn JobQueue>>,
    store: Option<Arc<dyn KeyValueStore>>,
    registry: Option<Arc<WorkerRegistry>>,
}

impl ConductorBuilder {
    pub fn config(mut self, config: ConductorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Conductor {
        let config = Arc::new(self.config.unwrap_or_default());
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new(config.events.channel_capacity)));
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let registry = self.registry.unwrap_or_else(|| Arc::new(WorkerRegistry::new()));
        let publisher = Arc::new(EventPublisher::new(config.events.channel_capacity));

        let enqueuer = JobEnqueuer::new(queue.clone(), registry.clone(), config.clone());
        let dead_letter = DeadLetterHandler::new(enqueuer.clone(), queue.clone(), config.clone());
        let coordinator = Coordinator::spawn(CoordinatorDeps {
            enqueuer: enqueuer.clone(),
            queue: queue.clone(),
            registry: registry.clone(),
            store,
            publisher: publisher.clone(),
            config: config.clone(),
        });

        Conductor {
            config,
            queue,
            registry,
            publisher,
            enqueuer,
            dead_letter,
            coordinator,
        }
    }
}

/// The orchestration engine's public surface
pub struct Conductor {
    config: Arc<ConductorConfig>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<WorkerRegistry>,
    publisher: Arc<EventPublisher>,
    enqueuer: JobEnqueuer,
    dead_letter: DeadLetterHandler,
    coordinator: CoordinatorHandle,
}

impl Conductor {
    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::default()
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Register a worker handler; steps, chunks, links, and callbacks all
    /// resolve through this registry.
    pub fn register_worker(&self, worker: Arc<dyn Worker>) {
        self.registry.register(worker);
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    // ----- jobs -----

    pub async fn enqueue(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.enqueuer.enqueue(worker, args, options).await
    }

    pub async fn enqueue_many(&self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
        self.enqueuer.enqueue_many(specs).await
    }

    /// Submit a job and block until its terminal state; `None` uses the
    /// configured `wait.default_timeout_ms`.
    pub async fn enqueue_and_wait(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        options: JobOptions,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.enqueuer
            .enqueue_and_wait(worker, args, options, timeout)
            .await
    }

    pub async fn schedule(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        at: DateTime<Utc>,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.enqueuer.schedule(worker, args, at, options).await
    }

    pub async fn schedule_in(
        &self,
        worker: impl Into<String> + std::fmt::Display,
        args: Value,
        delay: Duration,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.enqueuer.schedule_in(worker, args, delay, options).await
    }

    // ----- workflows -----

    pub async fn start_workflow(&self, spec: WorkflowSpec) -> Result<Uuid> {
        self.coordinator.start_workflow(spec).await
    }

    pub async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatusReport> {
        self.coordinator.get_workflow_status(workflow_id).await
    }

    pub async fn pause_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.coordinator.pause_workflow(workflow_id).await
    }

    pub async fn resume_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.coordinator.resume_workflow(workflow_id).await
    }

    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.coordinator.cancel_workflow(workflow_id).await
    }

    // ----- pipelines -----

    /// Start a linear chain; only the first link is enqueued, the rest of
    /// the chain rides along in the job args envelope.
    pub async fn pipeline(
        &self,
        links: Vec<PipelineLink>,
        options: PipelineOptions,
    ) -> Result<Uuid> {
        self.coordinator.start_pipeline(links, options).await
    }

    /// Called by a link worker on success to hand control to the next link
    pub async fn continue_pipeline(
        &self,
        envelope: PipelineEnvelope,
        result: Value,
    ) -> Result<()> {
        self.coordinator.continue_pipeline(envelope, result).await
    }

    /// Called by a link worker on failure; no further links are enqueued
    pub async fn fail_pipeline(
        &self,
        envelope: PipelineEnvelope,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.coordinator.fail_pipeline(envelope, reason).await
    }

    // ----- batches -----

    /// Partition items into chunks and enqueue one job per chunk
    pub async fn batch(
        &self,
        items: Vec<Value>,
        worker: impl Into<String>,
        options: BatchOptions,
    ) -> Result<Uuid> {
        self.coordinator.start_batch(items, worker, options).await
    }

    /// Called by chunk workers when a chunk finishes
    pub async fn report_batch_progress(
        &self,
        batch_id: Uuid,
        chunk_index: usize,
        outcome: ChunkOutcome,
    ) -> Result<()> {
        self.coordinator
            .report_batch_progress(batch_id, chunk_index, outcome)
            .await
    }

    pub async fn get_batch_status(&self, batch_id: Uuid) -> Result<BatchStatusReport> {
        self.coordinator.get_batch_status(batch_id).await
    }

    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<()> {
        self.coordinator.cancel_batch(batch_id).await
    }

    // ----- progress -----

    pub async fn update_progress(
        &self,
        job_id: Uuid,
        percentage: i64,
        message: impl Into<String>,
    ) -> Result<ProgressRecord> {
        self.coordinator
            .update_progress(job_id, percentage, message)
            .await
    }

    pub async fn get_progress(&self, job_id: Uuid) -> Result<ProgressRecord> {
        self.coordinator.get_progress(job_id).await
    }

    /// Receive future progress snapshots for a job as they are published.
    /// Delivery order matches update order for this job id.
    pub fn subscribe_to_progress(&self, job_id: Uuid) -> broadcast::Receiver<PublishedEvent> {
        self.publisher
            .subscribe(crate::progress::progress_topic(job_id))
    }

    // ----- dead letters -----

    pub async fn move_to_dead_letter(
        &self,
        job: &JobRecord,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<JobHandle> {
        self.dead_letter.move_to_dead_letter(job, reason).await
    }

    pub async fn retry_dead_letter(&self, job_id: Uuid) -> Result<JobHandle> {
        self.dead_letter.retry_dead_letter(job_id).await
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<JobRecord>> {
        self.dead_letter.list_dead_letters().await
    }

    // ----- stats -----

    pub async fn get_stats(&self) -> Result<StatsSnapshot> {
        self.coordinator.get_stats().await
    }

    pub async fn get_error_stats(&self) -> Result<ErrorStatsSnapshot> {
        self.coordinator.get_error_stats().await
    }

    pub async fn get_worker_performance(&self) -> Result<WorkerPerformanceSnapshot> {
        self.coordinator.get_worker_performance().await
    }

    /// Stop the coordinator; queued commands are drained first
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
