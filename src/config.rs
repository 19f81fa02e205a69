//! # Configuration System
//!
//! Explicit, validated configuration for the orchestration core. Values
//! come from defaults, an optional `conductor.toml`, and `CONDUCTOR`-prefixed
//! environment variables, in that order — no silent fallbacks beyond the
//! documented defaults.
//!
//! ## Usage
//!
//! ```rust
//! use conductor_core::config::ConductorConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConductorConfig::default();
//! assert_eq!(config.batch.default_chunk_size, 100);
//! # Ok(())
//! # }
//! ```

use crate::error::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the orchestration core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub events: EventConfig,
}

/// Queue naming and priority bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub default_queue: String,
    pub dead_letter_queue: String,
    pub max_priority: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
            dead_letter_queue: "dead_letter".to_string(),
            max_priority: 9,
        }
    }
}

/// Workflow graph limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub max_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { max_steps: 50 }
    }
}

/// Batch chunking bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub default_chunk_size: usize,
    pub max_chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: 100,
            max_chunk_size: 10_000,
        }
    }
}

/// Polling behavior for `enqueue_and_wait`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    pub poll_interval_ms: u64,
    pub default_timeout_ms: u64,
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            default_timeout_ms: 30_000,
        }
    }
}

/// Retention windows for coordinator-owned records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub workflow_ttl_secs: u64,
    pub batch_ttl_secs: u64,
    pub progress_ttl_secs: u64,
    pub stats_ttl_secs: u64,
}

impl RetentionConfig {
    pub fn workflow_ttl(&self) -> Duration {
        Duration::from_secs(self.workflow_ttl_secs)
    }

    pub fn batch_ttl(&self) -> Duration {
        Duration::from_secs(self.batch_ttl_secs)
    }

    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            workflow_ttl_secs: 86_400,
            batch_ttl_secs: 86_400,
            progress_ttl_secs: 3_600,
            stats_ttl_secs: 86_400,
        }
    }
}

/// Event channel sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

impl ConductorConfig {
    /// Load configuration: defaults, then `conductor.toml` if present, then
    /// `CONDUCTOR`-prefixed environment variables (separator `__`).
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("conductor").required(false))
            .add_source(
                config::Environment::with_prefix("CONDUCTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| OrchestrationError::Configuration {
                message: e.to_string(),
            })?;

        let config: Self =
            settings
                .try_deserialize()
                .map_err(|e| OrchestrationError::Configuration {
                    message: e.to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the core misbehave
    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_steps == 0 {
            return Err(OrchestrationError::Configuration {
                message: "workflow.max_steps must be greater than zero".to_string(),
            });
        }
        if self.batch.default_chunk_size == 0 {
            return Err(OrchestrationError::Configuration {
                message: "batch.default_chunk_size must be greater than zero".to_string(),
            });
        }
        if self.batch.default_chunk_size > self.batch.max_chunk_size {
            return Err(OrchestrationError::Configuration {
                message: format!(
                    "batch.default_chunk_size {} exceeds batch.max_chunk_size {}",
                    self.batch.default_chunk_size, self.batch.max_chunk_size
                ),
            });
        }
        if self.wait.poll_interval_ms == 0 {
            return Err(OrchestrationError::Configuration {
                message: "wait.poll_interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
