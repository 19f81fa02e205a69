//! # Operational Statistics
//!
//! Running counters and latency aggregates derived from the queue
//! collaborator's lifecycle feed. State lives inside the coordinator; this
//! module owns the aggregation logic and the snapshot types returned by the
//! stats queries.

use crate::queue::{JobEventKind, JobLifecycleEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-worker lifecycle counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCounters {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub discarded: u64,
    pub cancelled: u64,
}

/// Run-duration aggregates in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: u64,
    pub total_ms: u64,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl DurationStats {
    pub fn observe(&mut self, duration_ms: u64) {
        self.count += 1;
        self.total_ms += duration_ms;
        self.min_ms = Some(self.min_ms.map_or(duration_ms, |m| m.min(duration_ms)));
        self.max_ms = Some(self.max_ms.map_or(duration_ms, |m| m.max(duration_ms)));
    }

    pub fn avg_ms(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_ms as f64 / self.count as f64)
    }
}

/// Most recent failure seen for a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregated state fed by the lifecycle feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsState {
    pub by_worker: HashMap<String, WorkerCounters>,
    pub by_queue: HashMap<String, WorkerCounters>,
    pub by_terminal_state: HashMap<String, u64>,
    pub durations: HashMap<String, DurationStats>,
    pub last_errors: HashMap<String, LastError>,
}

impl StatsState {
    pub fn apply(&mut self, event: &JobLifecycleEvent) {
        let worker = self.by_worker.entry(event.worker.clone()).or_default();
        let queue = self.by_queue.entry(event.queue.clone()).or_default();
        match &event.kind {
            JobEventKind::Started => {
                worker.started += 1;
                queue.started += 1;
            }
            JobEventKind::Completed { .. } => {
                worker.completed += 1;
                queue.completed += 1;
                *self
                    .by_terminal_state
                    .entry("completed".to_string())
                    .or_default() += 1;
                if let Some(run_time) = event.measurements.run_time_ms {
                    self.durations
                        .entry(event.worker.clone())
                        .or_default()
                        .observe(run_time);
                }
            }
            JobEventKind::Failed { error, .. } => {
                worker.failed += 1;
                queue.failed += 1;
                self.last_errors.insert(
                    event.worker.clone(),
                    LastError {
                        message: error.clone(),
                        occurred_at: event.occurred_at,
                    },
                );
            }
            JobEventKind::Discarded { reason } => {
                worker.discarded += 1;
                queue.discarded += 1;
                *self
                    .by_terminal_state
                    .entry("discarded".to_string())
                    .or_default() += 1;
                self.last_errors.insert(
                    event.worker.clone(),
                    LastError {
                        message: reason.clone(),
                        occurred_at: event.occurred_at,
                    },
                );
            }
            JobEventKind::Cancelled => {
                worker.cancelled += 1;
                queue.cancelled += 1;
                *self
                    .by_terminal_state
                    .entry("cancelled".to_string())
                    .or_default() += 1;
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            by_worker: self.by_worker.clone(),
            by_queue: self.by_queue.clone(),
            by_terminal_state: self.by_terminal_state.clone(),
        }
    }

    pub fn error_snapshot(&self) -> ErrorStatsSnapshot {
        let by_worker = self
            .by_worker
            .iter()
            .filter(|(_, c)| c.failed > 0 || c.discarded > 0)
            .map(|(worker, counters)| {
                (
                    worker.clone(),
                    WorkerErrorStats {
                        failed: counters.failed,
                        discarded: counters.discarded,
                        last_error: self.last_errors.get(worker).cloned(),
                    },
                )
            })
            .collect();
        ErrorStatsSnapshot { by_worker }
    }

    /// Store-facing view of one worker's aggregates, mirrored under
    /// `stats:worker:<id>` after each lifecycle event.
    pub fn worker_record(&self, worker: &str) -> Option<WorkerStatsRecord> {
        let counters = self.by_worker.get(worker)?.clone();
        Some(WorkerStatsRecord {
            counters,
            durations: self.durations.get(worker).cloned(),
            last_error: self.last_errors.get(worker).cloned(),
        })
    }

    pub fn performance_snapshot(&self) -> WorkerPerformanceSnapshot {
        let by_worker = self
            .durations
            .iter()
            .map(|(worker, stats)| {
                (
                    worker.clone(),
                    WorkerPerformance {
                        completed: stats.count,
                        avg_ms: stats.avg_ms(),
                        min_ms: stats.min_ms,
                        max_ms: stats.max_ms,
                    },
                )
            })
            .collect();
        WorkerPerformanceSnapshot { by_worker }
    }
}

/// Per-worker aggregate persisted to the key-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatsRecord {
    pub counters: WorkerCounters,
    pub durations: Option<DurationStats>,
    pub last_error: Option<LastError>,
}

/// Counters snapshot returned by `get_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub by_worker: HashMap<String, WorkerCounters>,
    pub by_queue: HashMap<String, WorkerCounters>,
    pub by_terminal_state: HashMap<String, u64>,
}

/// Per-worker failure summary returned by `get_error_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerErrorStats {
    pub failed: u64,
    pub discarded: u64,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStatsSnapshot {
    pub by_worker: HashMap<String, WorkerErrorStats>,
}

/// Duration aggregates returned by `get_worker_performance`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPerformance {
    pub completed: u64,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPerformanceSnapshot {
    pub by_worker: HashMap<String, WorkerPerformance>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobMeasurements;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(worker: &str, kind: JobEventKind, run_time_ms: Option<u64>) -> JobLifecycleEvent {
        JobLifecycleEvent {
            job_id: Uuid::new_v4(),
            worker: worker.to_string(),
            queue: "default".to_string(),
            kind,
            metadata: HashMap::new(),
            measurements: JobMeasurements {
                queue_time_ms: None,
                run_time_ms,
            },
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_counters_track_lifecycle() {
        let mut stats = StatsState::default();
        stats.apply(&event("mailer", JobEventKind::Started, None));
        stats.apply(&event(
            "mailer",
            JobEventKind::Completed { result: json!(null) },
            Some(20),
        ));
        stats.apply(&event(
            "mailer",
            JobEventKind::Discarded {
                reason: "smtp down".to_string(),
            },
            None,
        ));

        let snapshot = stats.snapshot();
        let mailer = &snapshot.by_worker["mailer"];
        assert_eq!(mailer.started, 1);
        assert_eq!(mailer.completed, 1);
        assert_eq!(mailer.discarded, 1);
        assert_eq!(snapshot.by_terminal_state["completed"], 1);
        assert_eq!(snapshot.by_terminal_state["discarded"], 1);
    }

    #[test]
    fn test_duration_aggregates_ordering() {
        let mut stats = StatsState::default();
        for ms in [30, 10, 50] {
            stats.apply(&event(
                "resizer",
                JobEventKind::Completed { result: json!(null) },
                Some(ms),
            ));
        }
        let perf = stats.performance_snapshot();
        let resizer = &perf.by_worker["resizer"];
        assert_eq!(resizer.min_ms, Some(10));
        assert_eq!(resizer.max_ms, Some(50));
        let avg = resizer.avg_ms.unwrap();
        assert!(10.0 <= avg && avg <= 50.0);
        assert_eq!(resizer.completed, 3);
    }

    #[test]
    fn test_error_snapshot_keeps_last_error() {
        let mut stats = StatsState::default();
        stats.apply(&event(
            "flaky",
            JobEventKind::Failed {
                error: "first".to_string(),
                will_retry: true,
            },
            None,
        ));
        stats.apply(&event(
            "flaky",
            JobEventKind::Failed {
                error: "second".to_string(),
                will_retry: true,
            },
            None,
        ));

        let errors = stats.error_snapshot();
        let flaky = &errors.by_worker["flaky"];
        assert_eq!(flaky.failed, 2);
        assert_eq!(flaky.last_error.as_ref().unwrap().message, "second");
    }

    #[test]
    fn test_worker_record_collects_aggregates() {
        let mut stats = StatsState::default();
        stats.apply(&event("mailer", JobEventKind::Started, None));
        stats.apply(&event(
            "mailer",
            JobEventKind::Completed { result: json!(null) },
            Some(20),
        ));

        let record = stats.worker_record("mailer").unwrap();
        assert_eq!(record.counters.started, 1);
        assert_eq!(record.counters.completed, 1);
        assert_eq!(record.durations.unwrap().max_ms, Some(20));
        assert!(record.last_error.is_none());
        assert!(stats.worker_record("ghost").is_none());
    }

    #[test]
    fn test_error_snapshot_excludes_healthy_workers() {
        let mut stats = StatsState::default();
        stats.apply(&event("healthy", JobEventKind::Started, None));
        assert!(stats.error_snapshot().by_worker.is_empty());
    }
}
