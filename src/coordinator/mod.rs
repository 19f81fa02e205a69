//! # Orchestration Coordinator
//!
//! The single serialized owner of all mutable orchestration state:
//! workflows, pipelines, batches, progress records, and stats. One tokio
//! task drains a command channel and processes one state transition at a
//! time, which eliminates races on the dependency graph and on batch
//! counters without explicit locks. Callers interact only through
//! [`CoordinatorHandle`] request/reply messages.
//!
//! A forwarder task pumps the queue collaborator's lifecycle feed into the
//! same channel, so event handling is serialized with caller requests.
//! Events arriving after the owning workflow/batch/pipeline reached a
//! terminal state are no-ops.

mod state;

use crate::batch::{BatchOptions, BatchStatusReport, ChunkOutcome};
use crate::config::ConductorConfig;
use crate::enqueuer::JobEnqueuer;
use crate::error::{OrchestrationError, Result};
use crate::events::EventPublisher;
use crate::pipeline::{PipelineEnvelope, PipelineLink, PipelineOptions};
use crate::progress::ProgressRecord;
use crate::queue::{JobLifecycleEvent, JobQueue};
use crate::registry::WorkerRegistry;
use crate::stats::{ErrorStatsSnapshot, StatsSnapshot, WorkerPerformanceSnapshot};
use crate::store::KeyValueStore;
use crate::workflow::{WorkflowSpec, WorkflowStatusReport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) use state::CoordinatorState;

/// How often the coordinator sweeps expired records
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared collaborators handed to the coordinator at spawn
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub enqueuer: JobEnqueuer,
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<WorkerRegistry>,
    pub store: Arc<dyn KeyValueStore>,
    pub publisher: Arc<EventPublisher>,
    pub config: Arc<ConductorConfig>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

/// One state-transition request processed by the coordinator
pub enum Command {
    StartWorkflow {
        spec: WorkflowSpec,
        reply: Reply<Uuid>,
    },
    GetWorkflowStatus {
        workflow_id: Uuid,
        reply: Reply<WorkflowStatusReport>,
    },
    PauseWorkflow {
        workflow_id: Uuid,
        reply: Reply<()>,
    },
    ResumeWorkflow {
        workflow_id: Uuid,
        reply: Reply<()>,
    },
    CancelWorkflow {
        workflow_id: Uuid,
        reply: Reply<()>,
    },
    StartPipeline {
        links: Vec<PipelineLink>,
        options: PipelineOptions,
        reply: Reply<Uuid>,
    },
    ContinuePipeline {
        envelope: PipelineEnvelope,
        result: Value,
        reply: Reply<()>,
    },
    FailPipeline {
        envelope: PipelineEnvelope,
        reason: String,
        reply: Reply<()>,
    },
    StartBatch {
        items: Vec<Value>,
        worker: String,
        options: BatchOptions,
        reply: Reply<Uuid>,
    },
    ReportBatchProgress {
        batch_id: Uuid,
        chunk_index: usize,
        outcome: ChunkOutcome,
        reply: Reply<()>,
    },
    GetBatchStatus {
        batch_id: Uuid,
        reply: Reply<BatchStatusReport>,
    },
    CancelBatch {
        batch_id: Uuid,
        reply: Reply<()>,
    },
    UpdateProgress {
        job_id: Uuid,
        percentage: i64,
        message: String,
        reply: Reply<ProgressRecord>,
    },
    GetProgress {
        job_id: Uuid,
        reply: Reply<ProgressRecord>,
    },
    GetStats {
        reply: Reply<StatsSnapshot>,
    },
    GetErrorStats {
        reply: Reply<ErrorStatsSnapshot>,
    },
    GetWorkerPerformance {
        reply: Reply<WorkerPerformanceSnapshot>,
    },
    JobEvent(JobLifecycleEvent),
    SweepExpired {
        reply: Reply<usize>,
    },
    Shutdown,
}

/// Clonable handle; the only way to reach coordinator state
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| OrchestrationError::CoordinatorUnavailable {
                message: "coordinator task is not running".to_string(),
            })?;
        rx.await
            .map_err(|_| OrchestrationError::CoordinatorUnavailable {
                message: "coordinator dropped the request".to_string(),
            })?
    }

    pub async fn start_workflow(&self, spec: WorkflowSpec) -> Result<Uuid> {
        self.request(|reply| Command::StartWorkflow { spec, reply }).await
    }

    pub async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatusReport> {
        self.request(|reply| Command::GetWorkflowStatus { workflow_id, reply })
            .await
    }

    pub async fn pause_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.request(|reply| Command::PauseWorkflow { workflow_id, reply })
            .await
    }

    pub async fn resume_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.request(|reply| Command::ResumeWorkflow { workflow_id, reply })
            .await
    }

    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.request(|reply| Command::CancelWorkflow { workflow_id, reply })
            .await
    }

    pub async fn start_pipeline(
        &self,
        links: Vec<PipelineLink>,
        options: PipelineOptions,
    ) -> Result<Uuid> {
        self.request(|reply| Command::StartPipeline {
            links,
            options,
            reply,
        })
        .await
    }

    pub async fn continue_pipeline(&self, envelope: PipelineEnvelope, result: Value) -> Result<()> {
        self.request(|reply| Command::ContinuePipeline {
            envelope,
            result,
            reply,
        })
        .await
    }

    pub async fn fail_pipeline(
        &self,
        envelope: PipelineEnvelope,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        self.request(|reply| Command::FailPipeline {
            envelope,
            reason,
            reply,
        })
        .await
    }

    pub async fn start_batch(
        &self,
        items: Vec<Value>,
        worker: impl Into<String>,
        options: BatchOptions,
    ) -> Result<Uuid> {
        let worker = worker.into();
        self.request(|reply| Command::StartBatch {
            items,
            worker,
            options,
            reply,
        })
        .await
    }

    pub async fn report_batch_progress(
        &self,
        batch_id: Uuid,
        chunk_index: usize,
        outcome: ChunkOutcome,
    ) -> Result<()> {
        self.request(|reply| Command::ReportBatchProgress {
            batch_id,
            chunk_index,
            outcome,
            reply,
        })
        .await
    }

    pub async fn get_batch_status(&self, batch_id: Uuid) -> Result<BatchStatusReport> {
        self.request(|reply| Command::GetBatchStatus { batch_id, reply })
            .await
    }

    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<()> {
        self.request(|reply| Command::CancelBatch { batch_id, reply })
            .await
    }

    pub async fn update_progress(
        &self,
        job_id: Uuid,
        percentage: i64,
        message: impl Into<String>,
    ) -> Result<ProgressRecord> {
        let message = message.into();
        self.request(|reply| Command::UpdateProgress {
            job_id,
            percentage,
            message,
            reply,
        })
        .await
    }

    pub async fn get_progress(&self, job_id: Uuid) -> Result<ProgressRecord> {
        self.request(|reply| Command::GetProgress { job_id, reply })
            .await
    }

    pub async fn get_stats(&self) -> Result<StatsSnapshot> {
        self.request(|reply| Command::GetStats { reply }).await
    }

    pub async fn get_error_stats(&self) -> Result<ErrorStatsSnapshot> {
        self.request(|reply| Command::GetErrorStats { reply }).await
    }

    pub async fn get_worker_performance(&self) -> Result<WorkerPerformanceSnapshot> {
        self.request(|reply| Command::GetWorkerPerformance { reply })
            .await
    }

    pub async fn sweep_expired(&self) -> Result<usize> {
        self.request(|reply| Command::SweepExpired { reply }).await
    }

    /// Stop the coordinator task. Outstanding commands already queued are
    /// still processed before the loop exits.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

/// Coordinator task owning all orchestration state
pub struct Coordinator;

impl Coordinator {
    /// Spawn the coordinator loop, the lifecycle-event forwarder, and the
    /// periodic expiry sweep. Returns the handle callers use for every
    /// operation.
    pub fn spawn(deps: CoordinatorDeps) -> CoordinatorHandle {
        let (tx, mut rx) = mpsc::channel::<Command>(deps.config.events.channel_capacity);
        let handle = CoordinatorHandle { tx };

        spawn_event_forwarder(deps.queue.subscribe(), handle.clone());
        spawn_sweeper(handle.clone());

        let mut state = CoordinatorState::new(deps);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::StartWorkflow { spec, reply } => {
                        let _ = reply.send(state.start_workflow(spec).await);
                    }
                    Command::GetWorkflowStatus { workflow_id, reply } => {
                        let _ = reply.send(state.get_workflow_status(workflow_id));
                    }
                    Command::PauseWorkflow { workflow_id, reply } => {
                        let _ = reply.send(state.pause_workflow(workflow_id).await);
                    }
                    Command::ResumeWorkflow { workflow_id, reply } => {
                        let _ = reply.send(state.resume_workflow(workflow_id).await);
                    }
                    Command::CancelWorkflow { workflow_id, reply } => {
                        let _ = reply.send(state.cancel_workflow(workflow_id).await);
                    }
                    Command::StartPipeline {
                        links,
                        options,
                        reply,
                    } => {
                        let _ = reply.send(state.start_pipeline(links, options).await);
                    }
                    Command::ContinuePipeline {
                        envelope,
                        result,
                        reply,
                    } => {
                        let _ = reply.send(state.continue_pipeline(envelope, result).await);
                    }
                    Command::FailPipeline {
                        envelope,
                        reason,
                        reply,
                    } => {
                        let _ = reply.send(state.fail_pipeline(envelope, reason).await);
                    }
                    Command::StartBatch {
                        items,
                        worker,
                        options,
                        reply,
                    } => {
                        let _ = reply.send(state.start_batch(items, worker, options).await);
                    }
                    Command::ReportBatchProgress {
                        batch_id,
                        chunk_index,
                        outcome,
                        reply,
                    } => {
                        let _ = reply.send(
                            state
                                .report_batch_progress(batch_id, chunk_index, outcome)
                                .await,
                        );
                    }
                    Command::GetBatchStatus { batch_id, reply } => {
                        let _ = reply.send(state.get_batch_status(batch_id));
                    }
                    Command::CancelBatch { batch_id, reply } => {
                        let _ = reply.send(state.cancel_batch(batch_id).await);
                    }
                    Command::UpdateProgress {
                        job_id,
                        percentage,
                        message,
                        reply,
                    } => {
                        let _ = reply.send(state.update_progress(job_id, percentage, message).await);
                    }
                    Command::GetProgress { job_id, reply } => {
                        let _ = reply.send(state.get_progress(job_id));
                    }
                    Command::GetStats { reply } => {
                        let _ = reply.send(Ok(state.stats_snapshot()));
                    }
                    Command::GetErrorStats { reply } => {
                        let _ = reply.send(Ok(state.error_stats_snapshot()));
                    }
                    Command::GetWorkerPerformance { reply } => {
                        let _ = reply.send(Ok(state.worker_performance_snapshot()));
                    }
                    Command::JobEvent(event) => {
                        state.handle_job_event(event).await;
                    }
                    Command::SweepExpired { reply } => {
                        let _ = reply.send(Ok(state.sweep_expired()));
                    }
                    Command::Shutdown => {
                        debug!("coordinator shutting down");
                        break;
                    }
                }
            }
        });

        handle
    }
}

fn spawn_event_forwarder(
    mut feed: broadcast::Receiver<JobLifecycleEvent>,
    handle: CoordinatorHandle,
) {
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(event) => {
                    if handle.tx.send(Command::JobEvent(event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle feed lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_sweeper(handle: CoordinatorHandle) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if handle.sweep_expired().await.is_err() {
                break;
            }
        }
    });
}
