//! # Pipeline Executor Types
//!
//! A pipeline is a degenerate workflow: a strict chain of (worker, args)
//! pairs. Only the first link is enqueued up front; each link's job carries
//! the remaining chain and a monotonically increasing index in its args
//! envelope, and the worker hands control back through `continue_pipeline`
//! or `fail_pipeline`.

use crate::registry::CallbackRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Metadata keys attached to link jobs so lifecycle events can be routed
/// back to the owning pipeline.
pub mod meta {
    pub const PIPELINE_ID: &str = "pipeline_id";
    pub const LINK_INDEX: &str = "pipeline_link_index";
}

/// One link of a pipeline chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLink {
    pub worker: String,
    pub args: Value,
}

impl PipelineLink {
    pub fn new(worker: impl Into<String>, args: Value) -> Self {
        Self {
            worker: worker.into(),
            args,
        }
    }
}

/// Options accepted by `pipeline`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub queue: Option<String>,
    pub on_complete: Option<CallbackRef>,
    pub on_failure: Option<CallbackRef>,
}

/// Envelope embedded in every pipeline job's args. Workers receive this,
/// do their work against `args`, and call back with the same envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEnvelope {
    pub pipeline_id: Uuid,
    /// Zero-based position of this link in the original chain
    pub index: usize,
    /// Links still to run after this one
    pub remaining: Vec<PipelineLink>,
    /// This link's own arguments
    pub args: Value,
}

impl PipelineEnvelope {
    /// Envelope for the next link, consuming the head of the remainder
    pub fn advance(&self) -> Option<PipelineEnvelope> {
        let (next, rest) = self.remaining.split_first()?;
        Some(PipelineEnvelope {
            pipeline_id: self.pipeline_id,
            index: self.index + 1,
            remaining: rest.to_vec(),
            args: next.args.clone(),
        })
    }

    /// Worker id of the next link, if any
    pub fn next_worker(&self) -> Option<&str> {
        self.remaining.first().map(|l| l.worker.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Coordinator-owned pipeline record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub id: Uuid,
    pub total: usize,
    /// Index of the link most recently enqueued
    pub current_index: usize,
    pub status: PipelineStatus,
    /// Result recorded per completed link, by index
    pub results: Vec<Option<Value>>,
    pub error: Option<String>,
    pub on_complete: Option<CallbackRef>,
    pub on_failure: Option<CallbackRef>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(
        id: Uuid,
        total: usize,
        on_complete: Option<CallbackRef>,
        on_failure: Option<CallbackRef>,
    ) -> Self {
        Self {
            id,
            total,
            current_index: 0,
            status: PipelineStatus::Running,
            results: vec![None; total],
            error: None,
            on_complete,
            on_failure,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_result(&mut self, index: usize, result: Value) {
        if let Some(slot) = self.results.get_mut(index) {
            *slot = Some(result);
        }
    }
}
