//! Integration tests for chunked batches and linear pipelines, driving the
//! in-memory queue collaborator manually.

mod common;

use common::*;
use conductor_core::{
    BatchOptions, BatchStatus, CallbackRef, ChunkOutcome, JobState, OrchestrationError,
    PipelineEnvelope, PipelineLink, PipelineOptions,
};
use conductor_core::queue::InMemoryJobQueue;
use conductor_core::{batch, Conductor, JobRecord};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

fn items(count: usize) -> Vec<Value> {
    (0..count).map(|i| json!({"n": i})).collect()
}

fn chunk_jobs(queue: &InMemoryJobQueue, batch_id: Uuid) -> Vec<JobRecord> {
    queue
        .jobs_on_queue("default")
        .into_iter()
        .filter(|j| {
            j.metadata
                .get(batch::meta::BATCH_ID)
                .and_then(|v| v.as_str())
                == Some(batch_id.to_string().as_str())
        })
        .collect()
}

async fn wait_for_batch_status(conductor: &Conductor, batch_id: Uuid, status: BatchStatus) {
    for _ in 0..400 {
        let report = conductor.get_batch_status(batch_id).await.unwrap();
        if report.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("batch {batch_id} never reached {status:?}");
}

fn link_envelope(record: &JobRecord) -> PipelineEnvelope {
    serde_json::from_value(record.args.clone()).unwrap()
}

// ----- batches -----

#[tokio::test]
async fn batch_partitions_items_and_resolves_success() {
    let (conductor, queue) = conductor_with_workers(&["import_row"]).await;
    let (callback, calls) = CountingWorker::new("notify_batch");
    conductor.register_worker(callback);

    let batch_id = conductor
        .batch(
            items(250),
            "import_row",
            BatchOptions {
                chunk_size: Some(100),
                on_complete: Some(CallbackRef::new("notify_batch", json!({}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Running);
    assert_eq!(report.total, 3);

    // One job per chunk, each carrying its envelope
    let jobs = chunk_jobs(&queue, batch_id);
    assert_eq!(jobs.len(), 3);
    let sizes: Vec<usize> = jobs
        .iter()
        .map(|j| j.args["items"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes.iter().sum::<usize>(), 250);
    assert!(sizes.contains(&50));

    for index in 0..3 {
        conductor
            .report_batch_progress(batch_id, index, ChunkOutcome::Success)
            .await
            .unwrap();
    }

    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Success);
    assert_eq!(report.completed, 3);
    assert!(report.completed_at.is_some());

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_with_failed_chunk_resolves_partial_failure() {
    let (conductor, _queue) = conductor_with_workers(&["import_row"]).await;
    let (on_failure, failure_calls) = CountingWorker::new("batch_failed");
    let (on_complete, complete_calls) = CountingWorker::new("batch_done");
    conductor.register_worker(on_failure);
    conductor.register_worker(on_complete);

    let batch_id = conductor
        .batch(
            items(4),
            "import_row",
            BatchOptions {
                chunk_size: Some(2),
                on_complete: Some(CallbackRef::new("batch_done", json!({}))),
                on_failure: Some(CallbackRef::new("batch_failed", json!({}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    conductor
        .report_batch_progress(batch_id, 0, ChunkOutcome::Success)
        .await
        .unwrap();
    conductor
        .report_batch_progress(batch_id, 1, ChunkOutcome::Failure)
        .await
        .unwrap();

    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::PartialFailure);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    // Partial failure prefers the failure callback
    settle().await;
    assert_eq!(failure_calls.load(Ordering::SeqCst), 1);
    assert_eq!(complete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_and_late_chunk_reports_are_ignored() {
    let (conductor, _queue) = conductor_with_workers(&["import_row"]).await;

    let batch_id = conductor
        .batch(
            items(4),
            "import_row",
            BatchOptions {
                chunk_size: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    conductor
        .report_batch_progress(batch_id, 0, ChunkOutcome::Success)
        .await
        .unwrap();
    // Same chunk again, with a contradictory outcome
    conductor
        .report_batch_progress(batch_id, 0, ChunkOutcome::Failure)
        .await
        .unwrap();

    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Running);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);

    conductor
        .report_batch_progress(batch_id, 1, ChunkOutcome::Success)
        .await
        .unwrap();
    // Reports against a settled batch are accepted but change nothing
    conductor
        .report_batch_progress(batch_id, 1, ChunkOutcome::Failure)
        .await
        .unwrap();
    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Success);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn empty_batch_resolves_immediately() {
    let (conductor, queue) = conductor_with_workers(&["import_row"]).await;
    let (callback, calls) = CountingWorker::new("notify_batch");
    conductor.register_worker(callback);

    let batch_id = conductor
        .batch(
            Vec::new(),
            "import_row",
            BatchOptions {
                on_complete: Some(CallbackRef::new("notify_batch", json!({}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Success);
    assert_eq!(report.total, 0);
    assert!(queue.jobs_on_queue("default").is_empty());

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_batch_cancels_outstanding_chunk_jobs() {
    let (conductor, queue) = conductor_with_workers(&["import_row"]).await;

    let batch_id = conductor
        .batch(
            items(6),
            "import_row",
            BatchOptions {
                chunk_size: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    conductor.cancel_batch(batch_id).await.unwrap();
    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Cancelled);
    for job in chunk_jobs(&queue, batch_id) {
        assert_eq!(job.state, JobState::Cancelled);
    }

    // Cancel is not repeatable, but late chunk reports are harmless
    let err = conductor.cancel_batch(batch_id).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
    conductor
        .report_batch_progress(batch_id, 0, ChunkOutcome::Success)
        .await
        .unwrap();
    let report = conductor.get_batch_status(batch_id).await.unwrap();
    assert_eq!(report.status, BatchStatus::Cancelled);
    assert_eq!(report.completed, 0);
}

#[tokio::test]
async fn discarded_chunk_job_counts_as_chunk_failure() {
    let (conductor, queue) = conductor_with_workers(&["import_row"]).await;

    let batch_id = conductor
        .batch(
            items(4),
            "import_row",
            BatchOptions {
                chunk_size: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // One chunk reports success; the other dies without reporting
    conductor
        .report_batch_progress(batch_id, 0, ChunkOutcome::Success)
        .await
        .unwrap();
    let dead = chunk_jobs(&queue, batch_id)
        .into_iter()
        .find(|j| j.metadata.get(batch::meta::CHUNK_INDEX) == Some(&json!(1)))
        .unwrap();
    queue.start_job(dead.job_id).unwrap();
    queue.fail_job(dead.job_id, "worker crashed").unwrap();

    wait_for_batch_status(&conductor, batch_id, BatchStatus::PartialFailure).await;
}

#[tokio::test]
async fn batch_validation_rejects_bad_input() {
    let (conductor, _queue) = conductor_with_workers(&["import_row"]).await;

    let err = conductor
        .batch(
            items(1),
            "import_row",
            BatchOptions {
                chunk_size: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation { .. }));

    let too_big = conductor.config().batch.max_chunk_size + 1;
    let err = conductor
        .batch(
            items(1),
            "import_row",
            BatchOptions {
                chunk_size: Some(too_big),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation { .. }));

    let err = conductor
        .batch(items(1), "ghost", BatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::WorkerNotRegistered { .. }));
}

// ----- pipelines -----

fn etl_links() -> Vec<PipelineLink> {
    vec![
        PipelineLink::new("extract", json!({"source": "s3"})),
        PipelineLink::new("transform", json!({"format": "parquet"})),
        PipelineLink::new("load", json!({"target": "warehouse"})),
    ]
}

fn jobs_for_worker(queue: &InMemoryJobQueue, worker: &str) -> Vec<JobRecord> {
    queue
        .jobs_on_queue("default")
        .into_iter()
        .filter(|j| j.worker == worker)
        .collect()
}

#[tokio::test]
async fn pipeline_enqueues_only_the_first_link() {
    let (conductor, queue) = conductor_with_workers(&["extract", "transform", "load"]).await;

    let pipeline_id = conductor
        .pipeline(etl_links(), PipelineOptions::default())
        .await
        .unwrap();

    let jobs = queue.jobs_on_queue("default");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].worker, "extract");

    let envelope = link_envelope(&jobs[0]);
    assert_eq!(envelope.pipeline_id, pipeline_id);
    assert_eq!(envelope.index, 0);
    assert_eq!(envelope.remaining.len(), 2);
    assert_eq!(envelope.args["source"], "s3");
}

#[tokio::test]
async fn continue_pipeline_walks_the_chain_to_completion() {
    let (conductor, queue) = conductor_with_workers(&["extract", "transform", "load"]).await;
    let (callback, calls) = CountingWorker::new("etl_done");
    conductor.register_worker(callback);

    conductor
        .pipeline(
            etl_links(),
            PipelineOptions {
                on_complete: Some(CallbackRef::new("etl_done", json!({}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let extract = jobs_for_worker(&queue, "extract").pop().unwrap();
    run_job(&queue, &extract, json!({"rows": 10}));
    conductor
        .continue_pipeline(link_envelope(&extract), json!({"rows": 10}))
        .await
        .unwrap();

    // The next link rides in with the shrunken remainder
    let transform = jobs_for_worker(&queue, "transform").pop().unwrap();
    let envelope = link_envelope(&transform);
    assert_eq!(envelope.index, 1);
    assert_eq!(envelope.remaining.len(), 1);
    assert_eq!(envelope.args["format"], "parquet");

    run_job(&queue, &transform, json!({}));
    conductor
        .continue_pipeline(envelope, json!({"rows": 10}))
        .await
        .unwrap();

    let load = jobs_for_worker(&queue, "load").pop().unwrap();
    let envelope = link_envelope(&load);
    assert!(envelope.remaining.is_empty());
    run_job(&queue, &load, json!({}));
    conductor
        .continue_pipeline(envelope, json!({"loaded": true}))
        .await
        .unwrap();

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn redelivered_continuation_does_not_fork_the_chain() {
    let (conductor, queue) = conductor_with_workers(&["extract", "transform", "load"]).await;

    conductor
        .pipeline(etl_links(), PipelineOptions::default())
        .await
        .unwrap();

    let extract = jobs_for_worker(&queue, "extract").pop().unwrap();
    run_job(&queue, &extract, json!({"rows": 10}));
    let envelope = link_envelope(&extract);
    conductor
        .continue_pipeline(envelope.clone(), json!({"rows": 10}))
        .await
        .unwrap();
    // The queue redelivers; the second continuation is accepted but must
    // not enqueue the remainder a second time
    conductor
        .continue_pipeline(envelope, json!({"rows": 10}))
        .await
        .unwrap();

    assert_eq!(jobs_for_worker(&queue, "transform").len(), 1);

    // The chain still finishes normally afterwards
    let transform = jobs_for_worker(&queue, "transform").pop().unwrap();
    run_job(&queue, &transform, json!({}));
    conductor
        .continue_pipeline(link_envelope(&transform), json!({}))
        .await
        .unwrap();
    assert_eq!(jobs_for_worker(&queue, "load").len(), 1);
}

#[tokio::test]
async fn fail_pipeline_stops_the_chain() {
    let (conductor, queue) = conductor_with_workers(&["extract", "transform", "load"]).await;
    let (on_failure, failure_calls) = CountingWorker::new("etl_failed");
    conductor.register_worker(on_failure);

    conductor
        .pipeline(
            etl_links(),
            PipelineOptions {
                on_failure: Some(CallbackRef::new("etl_failed", json!({}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let extract = jobs_for_worker(&queue, "extract").pop().unwrap();
    let envelope = link_envelope(&extract);
    queue.start_job(extract.job_id).unwrap();
    conductor
        .fail_pipeline(envelope.clone(), "source unreachable")
        .await
        .unwrap();

    settle().await;
    assert_eq!(failure_calls.load(Ordering::SeqCst), 1);
    assert!(jobs_for_worker(&queue, "transform").is_empty());

    // A late continuation against the failed pipeline is a no-op
    conductor
        .continue_pipeline(envelope, json!({}))
        .await
        .unwrap();
    assert!(jobs_for_worker(&queue, "transform").is_empty());
    settle().await;
    assert_eq!(failure_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn discarded_link_job_fails_the_pipeline() {
    let (conductor, queue) = conductor_with_workers(&["extract", "transform", "load"]).await;
    let (on_failure, failure_calls) = CountingWorker::new("etl_failed");
    conductor.register_worker(on_failure);

    conductor
        .pipeline(
            etl_links(),
            PipelineOptions {
                on_failure: Some(CallbackRef::new("etl_failed", json!({}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let extract = jobs_for_worker(&queue, "extract").pop().unwrap();
    queue.start_job(extract.job_id).unwrap();
    queue.fail_job(extract.job_id, "oom killed").unwrap();

    for _ in 0..400 {
        if failure_calls.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(failure_calls.load(Ordering::SeqCst), 1);
    assert!(jobs_for_worker(&queue, "transform").is_empty());
}

#[tokio::test]
async fn pipeline_validation_rejects_bad_input() {
    let (conductor, _queue) = conductor_with_workers(&["extract"]).await;

    let err = conductor
        .pipeline(Vec::new(), PipelineOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation { .. }));

    let links = vec![
        PipelineLink::new("extract", json!({})),
        PipelineLink::new("ghost", json!({})),
    ];
    let err = conductor
        .pipeline(links, PipelineOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::WorkerNotRegistered { .. }));
}

#[tokio::test]
async fn continuation_for_unknown_pipeline_errors() {
    let (conductor, _queue) = conductor_with_workers(&[]).await;
    let envelope = PipelineEnvelope {
        pipeline_id: Uuid::new_v4(),
        index: 0,
        remaining: Vec::new(),
        args: Value::Null,
    };
    let err = conductor
        .continue_pipeline(envelope, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::PipelineNotFound { .. }));
}
