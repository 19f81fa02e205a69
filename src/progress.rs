//! # Progress Tracking Types
//!
//! Keyed store of the latest progress snapshot per job. Percentages are
//! clamped to 0..=100; each update overwrites the previous snapshot and is
//! published to subscribers of that job's progress topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Latest progress snapshot for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: Uuid,
    /// Clamped to 0..=100
    pub percentage: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(job_id: Uuid, percentage: i64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            percentage: clamp_percentage(percentage),
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Clamp any reported percentage into 0..=100
pub fn clamp_percentage(percentage: i64) -> u8 {
    percentage.clamp(0, 100) as u8
}

/// Topic a job's progress events are published on
pub fn progress_topic(job_id: Uuid) -> String {
    format!("progress:{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clamp_bounds() {
        assert_eq!(clamp_percentage(150), 100);
        assert_eq!(clamp_percentage(-10), 0);
        assert_eq!(clamp_percentage(42), 42);
    }

    #[test]
    fn test_record_applies_clamping() {
        let record = ProgressRecord::new(Uuid::new_v4(), 150, "x");
        assert_eq!(record.percentage, 100);
        let record = ProgressRecord::new(Uuid::new_v4(), -10, "x");
        assert_eq!(record.percentage, 0);
    }

    proptest! {
        #[test]
        fn prop_clamp_always_in_range(p in any::<i64>()) {
            let clamped = clamp_percentage(p);
            prop_assert!(clamped <= 100);
        }
    }
}
