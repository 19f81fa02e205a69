//! # Workflow Engine Types and Graph Logic
//!
//! A workflow is a directed acyclic graph of steps with dependency-gated
//! execution. This module owns the domain types, creation-time validation,
//! and ready-frontier computation; the serialized coordinator drives the
//! lifecycle (see [`crate::coordinator`]).
//!
//! ## Lifecycle
//!
//! - `start_workflow` validates the whole graph before any state exists,
//!   stores the workflow as running, and enqueues the initial frontier.
//! - Completion events from the queue collaborator advance the graph wave
//!   by wave; a step failure finalizes the workflow as failed immediately.
//! - `pause` stops new steps from starting (in-flight steps finish);
//!   `resume` recomputes and starts the frontier; `cancel` requests
//!   cancellation of every linked job and marks the workflow cancelled.

pub mod graph;
pub mod types;

pub use graph::{advance_frontier, materialize_steps};
pub use types::{
    StepCondition, StepDefinition, StepStatus, Workflow, WorkflowSpec, WorkflowStatus,
    WorkflowStatusReport, WorkflowStep,
};

/// Metadata keys attached to step jobs so lifecycle events can be routed
/// back to the owning workflow.
pub mod meta {
    pub const WORKFLOW_ID: &str = "workflow_id";
    pub const STEP_ID: &str = "workflow_step_id";
}
