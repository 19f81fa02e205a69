//! Workflow domain types: specs submitted by callers, the coordinator-owned
//! workflow record, and the status snapshot returned to queries.

use crate::registry::CallbackRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Status of a single workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Completed and skipped steps satisfy their dependents
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Workflow lifecycle status. Transitions are monotonic except for the
/// running <-> paused pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `next` is allowed from this status
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Completed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
                | (Paused, Cancelled)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Declarative gate evaluated against the accumulated results map before a
/// step may start. Kept as data (not a closure) so workflow records stay
/// serializable and all code resolution goes through the worker registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepCondition {
    Always,
    /// The named step completed (as opposed to being skipped)
    StepSucceeded { step: String },
    /// A field of the named step's result equals the given value
    FieldEquals { step: String, key: String, value: Value },
    /// A field of the named step's result is present and truthy
    FieldTruthy { step: String, key: String },
}

impl StepCondition {
    pub fn evaluate(&self, results: &HashMap<String, Value>) -> bool {
        match self {
            Self::Always => true,
            Self::StepSucceeded { step } => results.contains_key(step),
            Self::FieldEquals { step, key, value } => results
                .get(step)
                .and_then(|r| r.get(key))
                .is_some_and(|v| v == value),
            Self::FieldTruthy { step, key } => results
                .get(step)
                .and_then(|r| r.get(key))
                .is_some_and(|v| match v {
                    Value::Bool(b) => *b,
                    Value::Null => false,
                    Value::Number(n) => n.as_f64() != Some(0.0),
                    Value::String(s) => !s.is_empty(),
                    Value::Array(a) => !a.is_empty(),
                    Value::Object(_) => true,
                }),
        }
    }
}

/// One step as submitted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Explicit step id; generated from position when absent
    pub id: Option<String>,
    pub worker: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub condition: Option<StepCondition>,
}

impl StepDefinition {
    pub fn new(worker: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            worker: worker.into(),
            args,
            depends_on: Vec::new(),
            condition: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A workflow as submitted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub on_complete: Option<CallbackRef>,
    pub on_failure: Option<CallbackRef>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
            context: HashMap::new(),
            on_complete: None,
            on_failure: None,
        }
    }
}

/// One step of a stored workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub worker: String,
    pub args: Value,
    pub depends_on: Vec<String>,
    pub condition: Option<StepCondition>,
    pub status: StepStatus,
    /// Linked job once the step starts
    pub job_id: Option<Uuid>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Coordinator-owned workflow record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub context: HashMap<String, Value>,
    pub status: WorkflowStatus,
    /// Results keyed by step id; only completed steps appear here
    pub results: HashMap<String, Value>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub on_complete: Option<CallbackRef>,
    pub on_failure: Option<CallbackRef>,
}

impl Workflow {
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// True when every step satisfies its dependents (completed or skipped)
    pub fn all_steps_settled(&self) -> bool {
        self.steps.iter().all(|s| s.status.satisfies_dependents())
    }

    pub fn status_report(&self) -> WorkflowStatusReport {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        WorkflowStatusReport {
            workflow_id: self.id,
            name: self.name.clone(),
            status: self.status,
            total_steps: self.steps.len(),
            pending_steps: count(StepStatus::Pending),
            running_steps: count(StepStatus::Running),
            completed_steps: count(StepStatus::Completed),
            failed_steps: count(StepStatus::Failed),
            skipped_steps: count(StepStatus::Skipped),
            results: self.results.clone(),
            errors: self.errors.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Snapshot returned by `get_workflow_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    pub pending_steps: usize,
    pub running_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub results: HashMap<String, Value>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transition_rules() {
        use WorkflowStatus::*;
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        // Pausing only stops new steps; in-flight completions may still
        // finalize the workflow
        assert!(Paused.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Paused));
    }

    #[test]
    fn test_step_status_satisfaction() {
        assert!(StepStatus::Completed.satisfies_dependents());
        assert!(StepStatus::Skipped.satisfies_dependents());
        assert!(!StepStatus::Failed.satisfies_dependents());
        assert!(!StepStatus::Running.satisfies_dependents());
    }

    #[test]
    fn test_condition_field_equals() {
        let mut results = HashMap::new();
        results.insert("check".to_string(), json!({"approved": true, "score": 7}));

        let cond = StepCondition::FieldEquals {
            step: "check".to_string(),
            key: "approved".to_string(),
            value: json!(true),
        };
        assert!(cond.evaluate(&results));

        let cond = StepCondition::FieldEquals {
            step: "check".to_string(),
            key: "score".to_string(),
            value: json!(9),
        };
        assert!(!cond.evaluate(&results));
    }

    #[test]
    fn test_condition_field_truthy() {
        let mut results = HashMap::new();
        results.insert("scan".to_string(), json!({"hits": [], "flag": "yes"}));

        let empty_array = StepCondition::FieldTruthy {
            step: "scan".to_string(),
            key: "hits".to_string(),
        };
        assert!(!empty_array.evaluate(&results));

        let non_empty_string = StepCondition::FieldTruthy {
            step: "scan".to_string(),
            key: "flag".to_string(),
        };
        assert!(non_empty_string.evaluate(&results));
    }

    #[test]
    fn test_condition_against_missing_step() {
        let results = HashMap::new();
        let cond = StepCondition::StepSucceeded {
            step: "nope".to_string(),
        };
        assert!(!cond.evaluate(&results));
        assert!(StepCondition::Always.evaluate(&results));
    }
}
