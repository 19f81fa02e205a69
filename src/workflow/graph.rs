//! Dependency-graph validation and ready-frontier computation.
//!
//! Validation happens in full before any workflow state is created or any
//! job enqueued: step count bounds, id uniqueness, dependency resolution,
//! and acyclicity (Kahn's algorithm). Frontier computation is a synchronous
//! scan of the step list inside one coordinator transition.

use super::types::{StepDefinition, StepStatus, WorkflowStep};
use crate::error::{OrchestrationError, Result};
use crate::workflow::Workflow;
use std::collections::{HashMap, HashSet, VecDeque};

/// Validate a spec's steps and materialize them as stored steps with
/// resolved ids. Steps without an explicit id get `step_{position}` (1-based).
pub fn materialize_steps(
    definitions: &[StepDefinition],
    max_steps: usize,
) -> Result<Vec<WorkflowStep>> {
    if definitions.is_empty() {
        return Err(OrchestrationError::validation(
            "workflow must have at least one step",
        ));
    }
    if definitions.len() > max_steps {
        return Err(OrchestrationError::validation(format!(
            "workflow has {} steps, maximum is {max_steps}",
            definitions.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(definitions.len());
    for (index, def) in definitions.iter().enumerate() {
        let id = def
            .id
            .clone()
            .unwrap_or_else(|| format!("step_{}", index + 1));
        if id.trim().is_empty() {
            return Err(OrchestrationError::validation("step id must not be empty"));
        }
        if !seen.insert(id.clone()) {
            return Err(OrchestrationError::validation(format!(
                "duplicate step id: {id}"
            )));
        }
        if def.worker.trim().is_empty() {
            return Err(OrchestrationError::validation(format!(
                "step {id} has an empty worker id"
            )));
        }
        steps.push(WorkflowStep {
            id,
            worker: def.worker.clone(),
            args: def.args.clone(),
            depends_on: def.depends_on.clone(),
            condition: def.condition.clone(),
            status: StepStatus::Pending,
            job_id: None,
            result: None,
            error: None,
        });
    }

    for step in &steps {
        for dep in &step.depends_on {
            if !seen.contains(dep) {
                return Err(OrchestrationError::validation(format!(
                    "step {} depends on unknown step id: {dep}",
                    step.id
                )));
            }
            if dep == &step.id {
                return Err(OrchestrationError::validation(format!(
                    "step {} depends on itself",
                    step.id
                )));
            }
        }
    }

    ensure_acyclic(&steps)?;
    Ok(steps)
}

/// Kahn's algorithm over the adjacency lists; any unprocessed remainder
/// means a cycle.
fn ensure_acyclic(steps: &[WorkflowStep]) -> Result<()> {
    let mut in_degree: HashMap<&str, usize> = steps
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in &step.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut processed = 0;
    while let Some(id) = queue.pop_front() {
        processed += 1;
        if let Some(children) = dependents.get(id) {
            for child in children.clone() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    if processed != steps.len() {
        return Err(OrchestrationError::validation(
            "workflow dependency graph contains a cycle",
        ));
    }
    Ok(())
}

/// Advance the frontier: pending steps whose dependencies are all settled
/// either become ready (condition absent or true) or are marked skipped
/// (condition false). Skipping can settle further dependents, so this runs
/// to a fixpoint. Returns the ids of steps ready to start, in declaration
/// order.
pub fn advance_frontier(workflow: &mut Workflow) -> Vec<String> {
    let mut ready = Vec::new();
    loop {
        let mut changed = false;
        let settled: HashSet<String> = workflow
            .steps
            .iter()
            .filter(|s| s.status.satisfies_dependents())
            .map(|s| s.id.clone())
            .collect();

        for index in 0..workflow.steps.len() {
            let step = &workflow.steps[index];
            if step.status != StepStatus::Pending || ready.contains(&step.id) {
                continue;
            }
            if !step.depends_on.iter().all(|d| settled.contains(d)) {
                continue;
            }
            let passes = step
                .condition
                .as_ref()
                .map(|c| c.evaluate(&workflow.results))
                .unwrap_or(true);
            if passes {
                ready.push(step.id.clone());
            } else {
                workflow.steps[index].status = StepStatus::Skipped;
                changed = true;
            }
        }

        if !changed {
            return ready;
        }
        // A newly skipped step may settle its dependents; rescan
        ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{StepCondition, WorkflowStatus};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn def(id: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new("worker", json!({}))
            .with_id(id)
            .depends_on(deps.iter().copied())
    }

    fn workflow_from(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            steps,
            context: HashMap::new(),
            status: WorkflowStatus::Running,
            results: HashMap::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            on_complete: None,
            on_failure: None,
        }
    }

    #[test]
    fn test_empty_workflow_rejected() {
        assert!(materialize_steps(&[], 50).is_err());
    }

    #[test]
    fn test_step_count_limit_enforced() {
        let defs: Vec<StepDefinition> = (0..3).map(|i| def(&format!("s{i}"), &[])).collect();
        assert!(materialize_steps(&defs, 2).is_err());
        assert!(materialize_steps(&defs, 3).is_ok());
    }

    #[test]
    fn test_unresolved_dependency_rejected() {
        let defs = vec![def("a", &[]), def("b", &["missing"])];
        let err = materialize_steps(&defs, 50).unwrap_err();
        assert!(err.to_string().contains("unknown step id"));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let defs = vec![def("a", &[]), def("a", &[])];
        assert!(materialize_steps(&defs, 50).is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let defs = vec![def("a", &["c"]), def("b", &["a"]), def("c", &["b"])];
        let err = materialize_steps(&defs, 50).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_generated_ids_are_positional() {
        let defs = vec![
            StepDefinition::new("w", json!({})),
            StepDefinition::new("w", json!({})),
        ];
        let steps = materialize_steps(&defs, 50).unwrap();
        assert_eq!(steps[0].id, "step_1");
        assert_eq!(steps[1].id, "step_2");
    }

    #[test]
    fn test_initial_frontier_is_dependency_free_steps() {
        let steps = materialize_steps(
            &[def("a", &[]), def("b", &["a"]), def("c", &[])],
            50,
        )
        .unwrap();
        let mut workflow = workflow_from(steps);
        let ready = advance_frontier(&mut workflow);
        assert_eq!(ready, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_step_not_ready_until_all_dependencies_settle() {
        let steps = materialize_steps(
            &[def("a", &[]), def("b", &[]), def("c", &["a", "b"])],
            50,
        )
        .unwrap();
        let mut workflow = workflow_from(steps);
        workflow.step_mut("a").unwrap().status = StepStatus::Completed;
        let ready = advance_frontier(&mut workflow);
        assert_eq!(ready, vec!["b".to_string()]);

        workflow.step_mut("b").unwrap().status = StepStatus::Completed;
        let ready = advance_frontier(&mut workflow);
        assert_eq!(ready, vec!["c".to_string()]);
    }

    #[test]
    fn test_condition_false_skips_and_unlocks_dependents() {
        let mut defs = vec![def("a", &[]), def("gate", &["a"]), def("after", &["gate"])];
        defs[1].condition = Some(StepCondition::FieldTruthy {
            step: "a".to_string(),
            key: "proceed".to_string(),
        });
        let steps = materialize_steps(&defs, 50).unwrap();
        let mut workflow = workflow_from(steps);
        workflow.step_mut("a").unwrap().status = StepStatus::Completed;
        workflow
            .results
            .insert("a".to_string(), json!({"proceed": false}));

        let ready = advance_frontier(&mut workflow);
        assert_eq!(workflow.step("gate").unwrap().status, StepStatus::Skipped);
        assert_eq!(ready, vec!["after".to_string()]);
    }
}
