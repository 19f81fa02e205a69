//! # Batch Processor Types
//!
//! Partitions a large item collection into bounded-size chunks processed as
//! independent jobs. The coordinator aggregates chunk completions: a batch
//! resolves once `completed + failed == total`, to `success` when nothing
//! failed and `partial_failure` otherwise.

use crate::registry::CallbackRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Metadata keys attached to chunk jobs so lifecycle events can be routed
/// back to the owning batch.
pub mod meta {
    pub const BATCH_ID: &str = "batch_id";
    pub const CHUNK_INDEX: &str = "batch_chunk_index";
}

/// Options accepted by `batch`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Items per chunk; configuration default when absent. Controls chunk
    /// size only — chunk jobs run as parallel as the queue collaborator
    /// allows.
    pub chunk_size: Option<usize>,
    pub queue: Option<String>,
    pub on_complete: Option<CallbackRef>,
    pub on_failure: Option<CallbackRef>,
}

/// Envelope carried by every chunk job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChunkEnvelope {
    pub batch_id: Uuid,
    pub chunk_index: usize,
    pub items: Vec<Value>,
}

/// Outcome a worker reports for one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Success,
    PartialFailure,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Coordinator-owned batch record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: Uuid,
    pub worker: String,
    /// Total number of chunks
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub status: BatchStatus,
    /// Chunk indexes already counted; duplicate reports are ignored
    pub reported: HashSet<usize>,
    /// Job id per chunk index, for cancellation
    pub chunk_jobs: Vec<Uuid>,
    pub on_complete: Option<CallbackRef>,
    pub on_failure: Option<CallbackRef>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRecord {
    pub fn new(
        id: Uuid,
        worker: String,
        total: usize,
        on_complete: Option<CallbackRef>,
        on_failure: Option<CallbackRef>,
    ) -> Self {
        Self {
            id,
            worker,
            total,
            completed: 0,
            failed: 0,
            status: BatchStatus::Running,
            reported: HashSet::new(),
            chunk_jobs: Vec::with_capacity(total),
            on_complete,
            on_failure,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Count one chunk report. Returns false for duplicates, out-of-range
    /// indexes, and reports against an already-terminal batch.
    pub fn record_chunk(&mut self, chunk_index: usize, outcome: ChunkOutcome) -> bool {
        if self.status.is_terminal() || chunk_index >= self.total {
            return false;
        }
        if !self.reported.insert(chunk_index) {
            return false;
        }
        match outcome {
            ChunkOutcome::Success => self.completed += 1,
            ChunkOutcome::Failure => self.failed += 1,
        }
        debug_assert!(self.completed + self.failed <= self.total);
        true
    }

    /// True once every chunk has reported
    pub fn is_resolved(&self) -> bool {
        self.completed + self.failed == self.total
    }

    /// Resolve the final status; call only when `is_resolved()`
    pub fn resolve(&mut self) -> BatchStatus {
        self.status = if self.failed == 0 {
            BatchStatus::Success
        } else {
            BatchStatus::PartialFailure
        };
        self.completed_at = Some(Utc::now());
        self.status
    }

    /// Status snapshot for queries
    pub fn status_report(&self) -> BatchStatusReport {
        BatchStatusReport {
            batch_id: self.id,
            worker: self.worker.clone(),
            status: self.status,
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Snapshot returned by `get_batch_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub batch_id: Uuid,
    pub worker: String,
    pub status: BatchStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partition items into chunks of at most `chunk_size`, preserving order.
/// Only the final chunk may be short.
pub fn chunk_items(items: Vec<Value>, chunk_size: usize) -> Vec<Vec<Value>> {
    debug_assert!(chunk_size > 0);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(chunk_size),
            ));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_250_items_at_100_gives_three_chunks() {
        let items: Vec<Value> = (0..250).map(|i| json!(i)).collect();
        let chunks = chunk_items(items, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn test_duplicate_chunk_report_is_ignored() {
        let mut batch = BatchRecord::new(Uuid::new_v4(), "w".to_string(), 3, None, None);
        assert!(batch.record_chunk(0, ChunkOutcome::Success));
        assert!(!batch.record_chunk(0, ChunkOutcome::Failure));
        assert_eq!(batch.completed, 1);
        assert_eq!(batch.failed, 0);
    }

    #[test]
    fn test_out_of_range_chunk_report_is_ignored() {
        let mut batch = BatchRecord::new(Uuid::new_v4(), "w".to_string(), 2, None, None);
        assert!(!batch.record_chunk(5, ChunkOutcome::Success));
    }

    #[test]
    fn test_resolution_rules() {
        let mut batch = BatchRecord::new(Uuid::new_v4(), "w".to_string(), 2, None, None);
        batch.record_chunk(0, ChunkOutcome::Success);
        assert!(!batch.is_resolved());
        batch.record_chunk(1, ChunkOutcome::Success);
        assert!(batch.is_resolved());
        assert_eq!(batch.resolve(), BatchStatus::Success);

        let mut batch = BatchRecord::new(Uuid::new_v4(), "w".to_string(), 2, None, None);
        batch.record_chunk(0, ChunkOutcome::Success);
        batch.record_chunk(1, ChunkOutcome::Failure);
        assert_eq!(batch.resolve(), BatchStatus::PartialFailure);
    }

    #[test]
    fn test_reports_after_terminal_are_noops() {
        let mut batch = BatchRecord::new(Uuid::new_v4(), "w".to_string(), 1, None, None);
        batch.record_chunk(0, ChunkOutcome::Success);
        batch.resolve();
        assert!(!batch.record_chunk(0, ChunkOutcome::Failure));
        assert_eq!(batch.failed, 0);
    }

    proptest! {
        #[test]
        fn prop_chunking_covers_all_items_exactly_once(
            count in 0usize..1000,
            chunk_size in 1usize..200,
        ) {
            let items: Vec<Value> = (0..count).map(|i| json!(i)).collect();
            let chunks = chunk_items(items, chunk_size);

            let flattened: Vec<&Value> = chunks.iter().flatten().collect();
            prop_assert_eq!(flattened.len(), count);
            for (i, item) in flattened.iter().enumerate() {
                prop_assert_eq!(item.as_u64(), Some(i as u64));
            }
            // Every chunk but the last is full
            if let Some((last, body)) = chunks.split_last() {
                for chunk in body {
                    prop_assert_eq!(chunk.len(), chunk_size);
                }
                prop_assert!(last.len() <= chunk_size);
                prop_assert!(!last.is_empty());
            }
        }
    }
}
