//! Shared helpers for integration tests: a conductor wired to an
//! in-memory queue we can drive manually, plus polling utilities for the
//! asynchronous coordinator.

use async_trait::async_trait;
use conductor_core::{
    Conductor, JobRecord, Worker, WorkerError, WorkflowStatus, WorkflowStatusReport,
};
use conductor_core::queue::InMemoryJobQueue;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Worker that does nothing; jobs are driven manually through the queue
pub struct StubWorker {
    id: String,
}

impl StubWorker {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: id.into() })
    }
}

#[async_trait]
impl Worker for StubWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn perform(&self, _args: Value) -> Result<Value, WorkerError> {
        Ok(Value::Null)
    }
}

/// Worker that counts invocations; used for callback assertions
pub struct CountingWorker {
    id: String,
    pub calls: Arc<AtomicUsize>,
}

impl CountingWorker {
    pub fn new(id: impl Into<String>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                id: id.into(),
                calls: calls.clone(),
            }),
            calls,
        )
    }
}

#[async_trait]
impl Worker for CountingWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn perform(&self, _args: Value) -> Result<Value, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

/// Conductor wired to a shared in-memory queue with stub workers registered
pub async fn conductor_with_workers(workers: &[&str]) -> (Conductor, Arc<InMemoryJobQueue>) {
    let queue = Arc::new(InMemoryJobQueue::default());
    let conductor = Conductor::builder().queue(queue.clone()).build();
    for worker in workers {
        conductor.register_worker(StubWorker::new(*worker));
    }
    (conductor, queue)
}

/// Poll until the workflow reaches `status`, panicking after ~2s
pub async fn wait_for_workflow_status(
    conductor: &Conductor,
    workflow_id: Uuid,
    status: WorkflowStatus,
) -> WorkflowStatusReport {
    for _ in 0..400 {
        let report = conductor.get_workflow_status(workflow_id).await.unwrap();
        if report.status == status {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow {workflow_id} never reached {status:?}");
}

/// Poll until a job for the given workflow step shows up on the queue
pub async fn wait_for_step_job(
    queue: &InMemoryJobQueue,
    step_id: &str,
) -> JobRecord {
    for _ in 0..400 {
        if let Some(record) = find_step_job(queue, step_id) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no job appeared for step {step_id}");
}

pub fn find_step_job(queue: &InMemoryJobQueue, step_id: &str) -> Option<JobRecord> {
    queue.jobs_on_queue("default").into_iter().find(|j| {
        j.metadata
            .get(conductor_core::workflow::meta::STEP_ID)
            .and_then(|v| v.as_str())
            == Some(step_id)
    })
}

/// Run a queue job to successful completion
pub fn run_job(queue: &InMemoryJobQueue, record: &JobRecord, result: Value) {
    queue.start_job(record.job_id).unwrap();
    queue.complete_job(record.job_id, result).unwrap();
}

/// Give the coordinator a moment to drain pending events
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
