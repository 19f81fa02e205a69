#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Background job orchestration engine. On top of a pluggable job-queue
//! collaborator it provides three higher-level execution patterns —
//! dependency-graph workflows, linear pipelines, and bounded-concurrency
//! batches — plus progress tracking, dead-letter handling, and operational
//! statistics.
//!
//! ## Architecture
//!
//! Job execution itself runs on the external queue collaborator's worker
//! pool; this crate owns only the orchestration layer above it. All
//! mutable orchestration state (workflows, batches, pipelines, progress,
//! stats) is owned by a single serialized coordinator task that processes
//! one state-transition message at a time, which eliminates races on the
//! dependency graph and on batch counters without explicit locks.
//!
//! ## Module Organization
//!
//! - [`job`] - Job specs, options, handles, and observed snapshots
//! - [`queue`] - Job queue collaborator seam and in-process implementation
//! - [`enqueuer`] - Validation/translation layer in front of the queue
//! - [`workflow`] - Dependency-graph workflow types and frontier logic
//! - [`pipeline`] - Linear chain execution with an embedded remainder
//! - [`batch`] - Chunked processing of large item collections
//! - [`progress`] - Per-job progress snapshots with pub/sub notification
//! - [`dead_letter`] - Holding queue for jobs that exhausted retries
//! - [`stats`] - Counters and latency aggregates from the lifecycle feed
//! - [`coordinator`] - The serialized owner of all orchestration state
//! - [`registry`] - Closed worker registry used for steps and callbacks
//! - [`store`] - Key-value collaborator seam with per-key TTLs
//! - [`config`] - Explicit, validated configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conductor_core::{Conductor, StepDefinition, WorkflowSpec};
//! use serde_json::json;
//!
//! # async fn example() -> conductor_core::Result<()> {
//! let conductor = Conductor::builder().build();
//!
//! let spec = WorkflowSpec::new(
//!     "onboard_customer",
//!     vec![
//!         StepDefinition::new("create_account", json!({"plan": "pro"})).with_id("account"),
//!         StepDefinition::new("send_welcome", json!({}))
//!             .with_id("welcome")
//!             .depends_on(["account"]),
//!     ],
//! );
//! let workflow_id = conductor.start_workflow(spec).await?;
//! println!("{:?}", conductor.get_workflow_status(workflow_id).await?);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod dead_letter;
pub mod enqueuer;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod store;
pub mod system;
pub mod workflow;

pub use batch::{BatchOptions, BatchStatus, BatchStatusReport, ChunkOutcome};
pub use config::ConductorConfig;
pub use error::{OrchestrationError, Result};
pub use job::{JobHandle, JobOptions, JobRecord, JobSpec, JobState};
pub use pipeline::{PipelineEnvelope, PipelineLink, PipelineOptions, PipelineStatus};
pub use progress::ProgressRecord;
pub use queue::{InMemoryJobQueue, JobEventKind, JobLifecycleEvent, JobQueue};
pub use registry::{CallbackRef, Worker, WorkerError, WorkerRegistry};
pub use stats::{ErrorStatsSnapshot, StatsSnapshot, WorkerPerformanceSnapshot, WorkerStatsRecord};
pub use store::{InMemoryStore, KeyValueStore};
pub use system::{Conductor, ConductorBuilder};
pub use workflow::{
    StepCondition, StepDefinition, StepStatus, WorkflowSpec, WorkflowStatus, WorkflowStatusReport,
};
