//! Coordinator-owned state and transition handlers. Every method here runs
//! inside the single coordinator task; nothing in this module is shared or
//! locked. Readiness computation is a synchronous scan within one
//! transition and never suspends.

use super::CoordinatorDeps;
use crate::batch::{
    self, BatchChunkEnvelope, BatchOptions, BatchRecord, BatchStatus, BatchStatusReport,
    ChunkOutcome,
};
use crate::error::{OrchestrationError, Result};
use crate::job::{JobOptions, JobSpec};
use crate::pipeline::{
    self, PipelineEnvelope, PipelineLink, PipelineOptions, PipelineState, PipelineStatus,
};
use crate::progress::{progress_topic, ProgressRecord};
use crate::queue::{JobEventKind, JobLifecycleEvent};
use crate::registry::CallbackRef;
use crate::stats::{ErrorStatsSnapshot, StatsSnapshot, StatsState, WorkerPerformanceSnapshot};
use crate::store::keys;
use crate::workflow::{
    advance_frontier, materialize_steps, meta, StepStatus, Workflow, WorkflowSpec,
    WorkflowStatus, WorkflowStatusReport,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub(crate) struct CoordinatorState {
    deps: CoordinatorDeps,
    workflows: HashMap<Uuid, Workflow>,
    pipelines: HashMap<Uuid, PipelineState>,
    batches: HashMap<Uuid, BatchRecord>,
    progress: HashMap<Uuid, ProgressRecord>,
    /// Step job id -> (workflow id, step id), for event routing
    job_index: HashMap<Uuid, (Uuid, String)>,
    stats: StatsState,
}

impl CoordinatorState {
    pub(crate) fn new(deps: CoordinatorDeps) -> Self {
        Self {
            deps,
            workflows: HashMap::new(),
            pipelines: HashMap::new(),
            batches: HashMap::new(),
            progress: HashMap::new(),
            job_index: HashMap::new(),
            stats: StatsState::default(),
        }
    }

    // ----- workflows -----

    pub(crate) async fn start_workflow(&mut self, spec: WorkflowSpec) -> Result<Uuid> {
        // Everything is validated before any state exists or any job is
        // enqueued; failure here leaves no trace.
        let steps = materialize_steps(&spec.steps, self.deps.config.workflow.max_steps)?;
        for step in &steps {
            if !self.deps.registry.contains(&step.worker) {
                return Err(OrchestrationError::WorkerNotRegistered {
                    worker_id: step.worker.clone(),
                });
            }
        }

        let workflow_id = Uuid::new_v4();
        let mut workflow = Workflow {
            id: workflow_id,
            name: spec.name,
            steps,
            context: spec.context,
            status: WorkflowStatus::Running,
            results: HashMap::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            on_complete: spec.on_complete,
            on_failure: spec.on_failure,
        };
        let ready = advance_frontier(&mut workflow);
        info!(
            workflow_id = %workflow_id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            initial_frontier = ready.len(),
            "workflow started"
        );
        self.workflows.insert(workflow_id, workflow);

        self.start_steps(workflow_id, ready).await;
        self.check_workflow_settled(workflow_id).await;
        self.mirror_workflow(workflow_id).await;
        Ok(workflow_id)
    }

    pub(crate) fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatusReport> {
        self.workflows
            .get(&workflow_id)
            .map(Workflow::status_report)
            .ok_or(OrchestrationError::WorkflowNotFound { workflow_id })
    }

    pub(crate) async fn pause_workflow(&mut self, workflow_id: Uuid) -> Result<()> {
        let workflow = self.workflow_mut(workflow_id)?;
        if workflow.status != WorkflowStatus::Running {
            return Err(invalid_transition("workflow", workflow.status, "paused"));
        }
        workflow.status = WorkflowStatus::Paused;
        info!(workflow_id = %workflow_id, "workflow paused");
        self.mirror_workflow(workflow_id).await;
        Ok(())
    }

    pub(crate) async fn resume_workflow(&mut self, workflow_id: Uuid) -> Result<()> {
        let workflow = self.workflow_mut(workflow_id)?;
        if workflow.status != WorkflowStatus::Paused {
            return Err(invalid_transition("workflow", workflow.status, "running"));
        }
        workflow.status = WorkflowStatus::Running;
        let ready = advance_frontier(workflow);
        info!(
            workflow_id = %workflow_id,
            resumed_frontier = ready.len(),
            "workflow resumed"
        );
        self.start_steps(workflow_id, ready).await;
        self.check_workflow_settled(workflow_id).await;
        self.mirror_workflow(workflow_id).await;
        Ok(())
    }

    pub(crate) async fn cancel_workflow(&mut self, workflow_id: Uuid) -> Result<()> {
        let workflow = self.workflow_mut(workflow_id)?;
        if workflow.status.is_terminal() {
            return Err(invalid_transition("workflow", workflow.status, "cancelled"));
        }
        workflow.status = WorkflowStatus::Cancelled;
        workflow.completed_at = Some(Utc::now());
        let linked_jobs: Vec<Uuid> = workflow
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .filter_map(|s| s.job_id)
            .collect();

        for job_id in linked_jobs {
            self.job_index.remove(&job_id);
            if let Err(e) = self.deps.queue.cancel_job(job_id).await {
                warn!(workflow_id = %workflow_id, job_id = %job_id, error = %e,
                    "failed to cancel step job");
            }
        }
        info!(workflow_id = %workflow_id, "workflow cancelled");
        self.mirror_workflow(workflow_id).await;
        Ok(())
    }

    fn workflow_mut(&mut self, workflow_id: Uuid) -> Result<&mut Workflow> {
        self.workflows
            .get_mut(&workflow_id)
            .ok_or(OrchestrationError::WorkflowNotFound { workflow_id })
    }

    /// Enqueue a job for each ready step and link it to the workflow. An
    /// enqueue failure fails the whole workflow.
    async fn start_steps(&mut self, workflow_id: Uuid, ready: Vec<String>) {
        for step_id in ready {
            let Some(workflow) = self.workflows.get(&workflow_id) else {
                return;
            };
            if workflow.status != WorkflowStatus::Running {
                return;
            }
            let Some(step) = workflow.step(&step_id) else {
                continue;
            };
            let (worker, args) = (step.worker.clone(), step.args.clone());

            let mut options = JobOptions::default();
            options
                .metadata
                .insert(meta::WORKFLOW_ID.to_string(), Value::from(workflow_id.to_string()));
            options
                .metadata
                .insert(meta::STEP_ID.to_string(), Value::from(step_id.clone()));

            match self.deps.enqueuer.enqueue(worker, args, options).await {
                Ok(handle) => {
                    self.job_index
                        .insert(handle.job_id, (workflow_id, step_id.clone()));
                    if let Some(workflow) = self.workflows.get_mut(&workflow_id) {
                        if let Some(step) = workflow.step_mut(&step_id) {
                            step.status = StepStatus::Running;
                            step.job_id = Some(handle.job_id);
                        }
                    }
                    debug!(workflow_id = %workflow_id, step_id = %step_id,
                        job_id = %handle.job_id, "step started");
                }
                Err(e) => {
                    warn!(workflow_id = %workflow_id, step_id = %step_id, error = %e,
                        "step enqueue failed, failing workflow");
                    self.fail_workflow_step(workflow_id, &step_id, e.to_string())
                        .await;
                    return;
                }
            }
        }
    }

    /// Finalize as completed when every step has settled
    async fn check_workflow_settled(&mut self, workflow_id: Uuid) {
        let Some(workflow) = self.workflows.get_mut(&workflow_id) else {
            return;
        };
        if workflow.status.is_terminal() || !workflow.all_steps_settled() {
            return;
        }
        if !workflow
            .status
            .can_transition_to(WorkflowStatus::Completed)
        {
            return;
        }
        workflow.status = WorkflowStatus::Completed;
        workflow.completed_at = Some(Utc::now());
        let callback = workflow.on_complete.clone();
        let outcome = json!({
            "workflow_id": workflow_id,
            "status": "completed",
            "results": workflow.results,
        });
        info!(workflow_id = %workflow_id, "workflow completed");
        self.fire_callback(callback, outcome);
        self.mirror_workflow(workflow_id).await;
    }

    /// Record a step failure and finalize the workflow as failed. Sibling
    /// steps already in flight are left to finish; their late events are
    /// no-ops against the terminal workflow.
    async fn fail_workflow_step(&mut self, workflow_id: Uuid, step_id: &str, error: String) {
        let Some(workflow) = self.workflows.get_mut(&workflow_id) else {
            return;
        };
        if workflow.status.is_terminal() {
            return;
        }
        if let Some(step) = workflow.step_mut(step_id) {
            step.status = StepStatus::Failed;
            step.error = Some(error.clone());
        }
        workflow.errors.push(format!("step {step_id}: {error}"));
        workflow.status = WorkflowStatus::Failed;
        workflow.completed_at = Some(Utc::now());
        let callback = workflow.on_failure.clone();
        let outcome = json!({
            "workflow_id": workflow_id,
            "status": "failed",
            "failed_step": step_id,
            "errors": workflow.errors,
        });
        info!(workflow_id = %workflow_id, step_id = %step_id, "workflow failed");
        self.fire_callback(callback, outcome);
        self.mirror_workflow(workflow_id).await;
    }

    /// A step's job completed: store its result and advance the frontier
    async fn complete_workflow_step(
        &mut self,
        workflow_id: Uuid,
        step_id: String,
        result: Value,
    ) {
        let Some(workflow) = self.workflows.get_mut(&workflow_id) else {
            return;
        };
        if workflow.status.is_terminal() {
            debug!(workflow_id = %workflow_id, step_id = %step_id,
                "completion event for terminal workflow ignored");
            return;
        }
        let Some(step) = workflow.step_mut(&step_id) else {
            return;
        };
        if step.status != StepStatus::Running {
            return; // duplicate event, at-least-once delivery
        }
        step.status = StepStatus::Completed;
        step.result = Some(result.clone());
        workflow.results.insert(step_id.clone(), result);
        debug!(workflow_id = %workflow_id, step_id = %step_id, "step completed");

        if workflow.status == WorkflowStatus::Running {
            let ready = advance_frontier(workflow);
            self.start_steps(workflow_id, ready).await;
        }
        self.check_workflow_settled(workflow_id).await;
        self.mirror_workflow(workflow_id).await;
    }

    // ----- pipelines -----

    pub(crate) async fn start_pipeline(
        &mut self,
        links: Vec<PipelineLink>,
        options: PipelineOptions,
    ) -> Result<Uuid> {
        if links.is_empty() {
            return Err(OrchestrationError::validation(
                "pipeline must have at least one job",
            ));
        }
        for link in &links {
            if !self.deps.registry.contains(&link.worker) {
                return Err(OrchestrationError::WorkerNotRegistered {
                    worker_id: link.worker.clone(),
                });
            }
        }

        let pipeline_id = Uuid::new_v4();
        let envelope = PipelineEnvelope {
            pipeline_id,
            index: 0,
            remaining: links[1..].to_vec(),
            args: links[0].args.clone(),
        };
        let state = PipelineState::new(
            pipeline_id,
            links.len(),
            options.on_complete,
            options.on_failure,
        );
        self.pipelines.insert(pipeline_id, state);

        self.enqueue_pipeline_link(pipeline_id, &links[0].worker, envelope, options.queue)
            .await?;
        info!(pipeline_id = %pipeline_id, links = links.len(), "pipeline started");
        self.mirror_pipeline(pipeline_id).await;
        Ok(pipeline_id)
    }

    pub(crate) async fn continue_pipeline(
        &mut self,
        envelope: PipelineEnvelope,
        result: Value,
    ) -> Result<()> {
        let pipeline_id = envelope.pipeline_id;
        let state = self
            .pipelines
            .get_mut(&pipeline_id)
            .ok_or(OrchestrationError::PipelineNotFound { pipeline_id })?;
        if state.status.is_terminal() {
            return Ok(()); // late continuation against a settled pipeline
        }
        // At-least-once delivery: a redelivered continuation must not fork
        // the chain. Only the link most recently enqueued, not yet recorded,
        // may hand control forward.
        if envelope.index != state.current_index
            || state
                .results
                .get(envelope.index)
                .is_some_and(|slot| slot.is_some())
        {
            debug!(pipeline_id = %pipeline_id, index = envelope.index,
                expected = state.current_index, "duplicate pipeline continuation ignored");
            return Ok(());
        }
        state.record_result(envelope.index, result);

        if let Some(next) = envelope.advance() {
            let worker = envelope
                .next_worker()
                .map(str::to_string)
                .unwrap_or_default();
            state.current_index = next.index;
            debug!(pipeline_id = %pipeline_id, index = next.index, worker = %worker,
                "pipeline advancing");
            self.enqueue_pipeline_link(pipeline_id, &worker, next, None)
                .await?;
        } else {
            state.status = PipelineStatus::Completed;
            state.completed_at = Some(Utc::now());
            let callback = state.on_complete.clone();
            let outcome = json!({
                "pipeline_id": pipeline_id,
                "status": "completed",
                "results": state.results,
            });
            info!(pipeline_id = %pipeline_id, "pipeline completed");
            self.fire_callback(callback, outcome);
        }
        self.mirror_pipeline(pipeline_id).await;
        Ok(())
    }

    pub(crate) async fn fail_pipeline(
        &mut self,
        envelope: PipelineEnvelope,
        reason: String,
    ) -> Result<()> {
        let pipeline_id = envelope.pipeline_id;
        let state = self
            .pipelines
            .get_mut(&pipeline_id)
            .ok_or(OrchestrationError::PipelineNotFound { pipeline_id })?;
        if state.status.is_terminal() {
            return Ok(());
        }
        state.current_index = envelope.index;
        state.status = PipelineStatus::Failed;
        state.error = Some(reason.clone());
        state.completed_at = Some(Utc::now());
        let callback = state.on_failure.clone();
        let outcome = json!({
            "pipeline_id": pipeline_id,
            "status": "failed",
            "failed_at_index": envelope.index,
            "reason": reason,
        });
        info!(pipeline_id = %pipeline_id, index = envelope.index, "pipeline failed");
        self.fire_callback(callback, outcome);
        self.mirror_pipeline(pipeline_id).await;
        Ok(())
    }

    async fn enqueue_pipeline_link(
        &mut self,
        pipeline_id: Uuid,
        worker: &str,
        envelope: PipelineEnvelope,
        queue: Option<String>,
    ) -> Result<()> {
        let index = envelope.index;
        let mut options = JobOptions {
            queue,
            ..Default::default()
        };
        options.metadata.insert(
            pipeline::meta::PIPELINE_ID.to_string(),
            Value::from(pipeline_id.to_string()),
        );
        options.metadata.insert(
            pipeline::meta::LINK_INDEX.to_string(),
            Value::from(index as u64),
        );
        let args = serde_json::to_value(&envelope)?;
        match self.deps.enqueuer.enqueue(worker.to_string(), args, options).await {
            Ok(handle) => {
                debug!(pipeline_id = %pipeline_id, index, job_id = %handle.job_id,
                    "pipeline link enqueued");
                Ok(())
            }
            Err(e) => {
                if let Some(state) = self.pipelines.get_mut(&pipeline_id) {
                    state.status = PipelineStatus::Failed;
                    state.error = Some(e.to_string());
                    state.completed_at = Some(Utc::now());
                    let callback = state.on_failure.clone();
                    let outcome = json!({
                        "pipeline_id": pipeline_id,
                        "status": "failed",
                        "failed_at_index": index,
                        "reason": e.to_string(),
                    });
                    self.fire_callback(callback, outcome);
                }
                Err(e)
            }
        }
    }

    // ----- batches -----

    pub(crate) async fn start_batch(
        &mut self,
        items: Vec<Value>,
        worker: String,
        options: BatchOptions,
    ) -> Result<Uuid> {
        let chunk_size = options
            .chunk_size
            .unwrap_or(self.deps.config.batch.default_chunk_size);
        if chunk_size == 0 {
            return Err(OrchestrationError::validation(
                "chunk_size must be greater than zero",
            ));
        }
        if chunk_size > self.deps.config.batch.max_chunk_size {
            return Err(OrchestrationError::validation(format!(
                "chunk_size {chunk_size} exceeds maximum {}",
                self.deps.config.batch.max_chunk_size
            )));
        }
        if !self.deps.registry.contains(&worker) {
            return Err(OrchestrationError::WorkerNotRegistered { worker_id: worker });
        }

        let batch_id = Uuid::new_v4();
        let chunks = batch::chunk_items(items, chunk_size);
        let mut record = BatchRecord::new(
            batch_id,
            worker.clone(),
            chunks.len(),
            options.on_complete,
            options.on_failure,
        );

        if chunks.is_empty() {
            // Nothing to do; resolves immediately
            record.resolve();
            let callback = record.on_complete.clone();
            let outcome = batch_outcome(&record);
            self.batches.insert(batch_id, record);
            self.fire_callback(callback, outcome);
            self.mirror_batch(batch_id).await;
            return Ok(batch_id);
        }

        let specs: Vec<JobSpec> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, items)| {
                let envelope = BatchChunkEnvelope {
                    batch_id,
                    chunk_index,
                    items,
                };
                let mut job_options = JobOptions {
                    queue: options.queue.clone(),
                    ..Default::default()
                };
                job_options.metadata.insert(
                    batch::meta::BATCH_ID.to_string(),
                    Value::from(batch_id.to_string()),
                );
                job_options.metadata.insert(
                    batch::meta::CHUNK_INDEX.to_string(),
                    Value::from(chunk_index as u64),
                );
                Ok(JobSpec::new(worker.clone(), serde_json::to_value(&envelope)?)
                    .with_options(job_options))
            })
            .collect::<Result<_>>()?;

        // Atomic: an invalid spec submits nothing and no batch exists
        let handles = self.deps.enqueuer.enqueue_many(specs).await?;
        record.chunk_jobs = handles.iter().map(|h| h.job_id).collect();
        info!(batch_id = %batch_id, chunks = record.total, worker = %worker, "batch started");
        self.batches.insert(batch_id, record);
        self.mirror_batch(batch_id).await;
        Ok(batch_id)
    }

    pub(crate) async fn report_batch_progress(
        &mut self,
        batch_id: Uuid,
        chunk_index: usize,
        outcome: ChunkOutcome,
    ) -> Result<()> {
        let record = self
            .batches
            .get_mut(&batch_id)
            .ok_or(OrchestrationError::BatchNotFound { batch_id })?;
        if record.status.is_terminal() {
            return Ok(()); // late report against a settled batch
        }
        if !record.record_chunk(chunk_index, outcome) {
            return Ok(()); // duplicate or out-of-range report
        }
        debug!(batch_id = %batch_id, chunk_index, completed = record.completed,
            failed = record.failed, "batch chunk reported");

        if record.is_resolved() {
            let status = record.resolve();
            let callback = match status {
                BatchStatus::PartialFailure => {
                    record.on_failure.clone().or_else(|| record.on_complete.clone())
                }
                _ => record.on_complete.clone(),
            };
            let outcome = batch_outcome(record);
            info!(batch_id = %batch_id, status = %status, "batch resolved");
            self.fire_callback(callback, outcome);
        }
        self.mirror_batch(batch_id).await;
        Ok(())
    }

    pub(crate) fn get_batch_status(&self, batch_id: Uuid) -> Result<BatchStatusReport> {
        self.batches
            .get(&batch_id)
            .map(BatchRecord::status_report)
            .ok_or(OrchestrationError::BatchNotFound { batch_id })
    }

    pub(crate) async fn cancel_batch(&mut self, batch_id: Uuid) -> Result<()> {
        let record = self
            .batches
            .get_mut(&batch_id)
            .ok_or(OrchestrationError::BatchNotFound { batch_id })?;
        if record.status.is_terminal() {
            return Err(invalid_transition("batch", record.status, "cancelled"));
        }
        record.status = BatchStatus::Cancelled;
        record.completed_at = Some(Utc::now());
        let chunk_jobs = record.chunk_jobs.clone();
        for job_id in chunk_jobs {
            if let Err(e) = self.deps.queue.cancel_job(job_id).await {
                warn!(batch_id = %batch_id, job_id = %job_id, error = %e,
                    "failed to cancel chunk job");
            }
        }
        info!(batch_id = %batch_id, "batch cancelled");
        self.mirror_batch(batch_id).await;
        Ok(())
    }

    // ----- progress -----

    pub(crate) async fn update_progress(
        &mut self,
        job_id: Uuid,
        percentage: i64,
        message: String,
    ) -> Result<ProgressRecord> {
        let record = ProgressRecord::new(job_id, percentage, message);
        self.progress.insert(job_id, record.clone());
        self.deps
            .publisher
            .publish(progress_topic(job_id), serde_json::to_value(&record)?);
        self.mirror(
            keys::progress(job_id),
            &record,
            self.deps.config.retention.progress_ttl(),
        )
        .await;
        Ok(record)
    }

    pub(crate) fn get_progress(&self, job_id: Uuid) -> Result<ProgressRecord> {
        self.progress
            .get(&job_id)
            .cloned()
            .ok_or(OrchestrationError::ProgressNotFound { job_id })
    }

    // ----- stats -----

    pub(crate) fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn error_stats_snapshot(&self) -> ErrorStatsSnapshot {
        self.stats.error_snapshot()
    }

    pub(crate) fn worker_performance_snapshot(&self) -> WorkerPerformanceSnapshot {
        self.stats.performance_snapshot()
    }

    // ----- lifecycle events -----

    pub(crate) async fn handle_job_event(&mut self, event: JobLifecycleEvent) {
        self.stats.apply(&event);
        self.mirror_worker_stats(&event.worker).await;

        if let Some((workflow_id, step_id)) = workflow_route(&event) {
            match &event.kind {
                JobEventKind::Completed { result } => {
                    self.job_index.remove(&event.job_id);
                    self.complete_workflow_step(workflow_id, step_id, result.clone())
                        .await;
                }
                JobEventKind::Discarded { reason } => {
                    self.job_index.remove(&event.job_id);
                    self.fail_workflow_step(workflow_id, &step_id, reason.clone())
                        .await;
                }
                JobEventKind::Failed {
                    error,
                    will_retry: false,
                } => {
                    self.job_index.remove(&event.job_id);
                    self.fail_workflow_step(workflow_id, &step_id, error.clone())
                        .await;
                }
                // Retryable failures stay with the collaborator; cancels
                // were initiated by this core
                _ => {}
            }
            return;
        }

        if let Some((batch_id, chunk_index)) = batch_route(&event) {
            // Workers normally report chunk outcomes themselves; a chunk
            // job that dies without reporting still counts as a failure
            if matches!(event.kind, JobEventKind::Discarded { .. }) {
                if let Err(e) = self
                    .report_batch_progress(batch_id, chunk_index, ChunkOutcome::Failure)
                    .await
                {
                    debug!(batch_id = %batch_id, error = %e, "chunk discard not counted");
                }
            }
            return;
        }

        if let Some((pipeline_id, index)) = pipeline_route(&event) {
            if let JobEventKind::Discarded { reason } = &event.kind {
                let envelope = PipelineEnvelope {
                    pipeline_id,
                    index,
                    remaining: Vec::new(),
                    args: Value::Null,
                };
                if let Err(e) = self.fail_pipeline(envelope, reason.clone()).await {
                    debug!(pipeline_id = %pipeline_id, error = %e,
                        "link discard not recorded");
                }
            }
        }
    }

    // ----- retention -----

    /// Drop terminal records older than their retention window
    pub(crate) fn sweep_expired(&mut self) -> usize {
        let now = Utc::now();
        let retention = &self.deps.config.retention;
        let workflow_ttl = chrono_ttl(retention.workflow_ttl());
        let batch_ttl = chrono_ttl(retention.batch_ttl());
        let progress_ttl = chrono_ttl(retention.progress_ttl());

        let before = self.workflows.len() + self.batches.len() + self.pipelines.len()
            + self.progress.len();
        self.workflows.retain(|_, w| {
            !(w.status.is_terminal()
                && w.completed_at.is_some_and(|at| at + workflow_ttl < now))
        });
        self.batches.retain(|_, b| {
            !(b.status.is_terminal()
                && b.completed_at.is_some_and(|at| at + batch_ttl < now))
        });
        self.pipelines.retain(|_, p| {
            !(p.status.is_terminal()
                && p.completed_at.is_some_and(|at| at + batch_ttl < now))
        });
        self.progress
            .retain(|_, p| p.updated_at + progress_ttl >= now);
        let swept = before
            - (self.workflows.len()
                + self.batches.len()
                + self.pipelines.len()
                + self.progress.len());
        if swept > 0 {
            debug!(swept, "expired orchestration records reclaimed");
        }
        swept
    }

    // ----- helpers -----

    /// Callbacks run isolated on their own task; a slow or broken callback
    /// never stalls the coordinator loop.
    fn fire_callback(&self, callback: Option<CallbackRef>, outcome: Value) {
        if let Some(callback) = callback {
            let registry = self.deps.registry.clone();
            tokio::spawn(async move {
                registry.invoke_callback(&callback, outcome).await;
            });
        }
    }

    async fn mirror<T: Serialize>(&self, key: String, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(value) => {
                if let Err(e) = self.deps.store.put(&key, value, Some(ttl)).await {
                    warn!(key = %key, error = %e, "failed to mirror record to store");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "failed to serialize record"),
        }
    }

    async fn mirror_workflow(&self, workflow_id: Uuid) {
        if let Some(workflow) = self.workflows.get(&workflow_id) {
            let ttl = self.deps.config.retention.workflow_ttl();
            self.mirror(keys::workflow(workflow_id), workflow, ttl).await;
        }
    }

    async fn mirror_batch(&self, batch_id: Uuid) {
        if let Some(record) = self.batches.get(&batch_id) {
            let ttl = self.deps.config.retention.batch_ttl();
            self.mirror(keys::batch(batch_id), record, ttl).await;
        }
    }

    async fn mirror_worker_stats(&self, worker: &str) {
        if let Some(record) = self.stats.worker_record(worker) {
            let ttl = self.deps.config.retention.stats_ttl();
            self.mirror(keys::worker_stats(worker), &record, ttl).await;
        }
    }

    async fn mirror_pipeline(&self, pipeline_id: Uuid) {
        if let Some(state) = self.pipelines.get(&pipeline_id) {
            let ttl = self.deps.config.retention.batch_ttl();
            self.mirror(keys::pipeline(pipeline_id), state, ttl).await;
        }
    }
}

fn invalid_transition(
    entity: &str,
    from: impl std::fmt::Display,
    requested: &str,
) -> OrchestrationError {
    OrchestrationError::InvalidTransition {
        entity: entity.to_string(),
        from: from.to_string(),
        requested: requested.to_string(),
    }
}

fn batch_outcome(record: &BatchRecord) -> Value {
    json!({
        "batch_id": record.id,
        "status": record.status,
        "total": record.total,
        "completed": record.completed,
        "failed": record.failed,
    })
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

fn meta_uuid(event: &JobLifecycleEvent, key: &str) -> Option<Uuid> {
    event
        .metadata
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn workflow_route(event: &JobLifecycleEvent) -> Option<(Uuid, String)> {
    let workflow_id = meta_uuid(event, meta::WORKFLOW_ID)?;
    let step_id = event
        .metadata
        .get(meta::STEP_ID)
        .and_then(|v| v.as_str())?
        .to_string();
    Some((workflow_id, step_id))
}

fn batch_route(event: &JobLifecycleEvent) -> Option<(Uuid, usize)> {
    let batch_id = meta_uuid(event, batch::meta::BATCH_ID)?;
    let chunk_index = event
        .metadata
        .get(batch::meta::CHUNK_INDEX)
        .and_then(|v| v.as_u64())? as usize;
    Some((batch_id, chunk_index))
}

fn pipeline_route(event: &JobLifecycleEvent) -> Option<(Uuid, usize)> {
    let pipeline_id = meta_uuid(event, pipeline::meta::PIPELINE_ID)?;
    let index = event
        .metadata
        .get(pipeline::meta::LINK_INDEX)
        .and_then(|v| v.as_u64())? as usize;
    Some((pipeline_id, index))
}
