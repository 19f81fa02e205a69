//! # Orchestration Error Types
//!
//! Structured error handling for the orchestration core using thiserror
//! for typed error variants instead of `Box<dyn Error>` patterns.
//!
//! Validation and not-found errors are returned synchronously to callers;
//! execution-time failures (step/job failures) are never surfaced here —
//! they live in workflow/batch state and reach callers only through status
//! queries or callbacks.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by the public orchestration operations
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: Uuid },

    #[error("Batch not found: {batch_id}")]
    BatchNotFound { batch_id: Uuid },

    #[error("Pipeline not found: {pipeline_id}")]
    PipelineNotFound { pipeline_id: Uuid },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    #[error("No progress recorded for job: {job_id}")]
    ProgressNotFound { job_id: Uuid },

    #[error("Invalid {entity} transition: {from} -> {requested}")]
    InvalidTransition {
        entity: String,
        from: String,
        requested: String,
    },

    #[error("Queue operation failed: {operation}: {message}")]
    QueueError { operation: String, message: String },

    #[error("Timed out waiting for {operation} after {waited_ms}ms")]
    Timeout { operation: String, waited_ms: u64 },

    #[error("Job {job_id} was discarded: {reason}")]
    JobDiscarded { job_id: Uuid, reason: String },

    #[error("Job {job_id} was cancelled")]
    JobCancelled { job_id: Uuid },

    #[error("Worker not registered: {worker_id}")]
    WorkerNotRegistered { worker_id: String },

    #[error("Coordinator unavailable: {message}")]
    CoordinatorUnavailable { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl OrchestrationError {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a queue collaborator failure
    pub fn queue(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueError {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = OrchestrationError::queue("enqueue", "connection refused");
        assert_eq!(
            err.to_string(),
            "Queue operation failed: enqueue: connection refused"
        );

        let err = OrchestrationError::Timeout {
            operation: "enqueue_and_wait".to_string(),
            waited_ms: 500,
        };
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn test_validation_shorthand() {
        let err = OrchestrationError::validation("workflow has no steps");
        assert!(matches!(err, OrchestrationError::Validation { .. }));
    }
}
