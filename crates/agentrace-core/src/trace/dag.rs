//! Dependency graph checks and ready-set computation.
//!
//! Uses `petgraph` to model step dependencies as a directed graph for
//! registration-time validation. At run time the scheduler works from the
//! step statuses directly via [`ready_set`].

use std::collections::{HashMap, HashSet};

use agentrace_types::trace::{StepExecution, StepStatus, StepTemplate};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::error::TraceError;

/// Validate that steps form a DAG: unique ids, known dependencies, no cycles.
///
/// Returns the step ids in one valid topological order.
pub fn validate_graph(steps: &[StepTemplate]) -> Result<Vec<&str>, TraceError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut id_to_node = HashMap::with_capacity(steps.len());

    for step in steps {
        let node = graph.add_node(step.id.as_str());
        if id_to_node.insert(step.id.as_str(), node).is_some() {
            return Err(TraceError::validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    // Edge from dependency -> dependent
    for step in steps {
        let to = id_to_node[step.id.as_str()];
        for dep in &step.dependencies {
            let from = id_to_node.get(dep.as_str()).ok_or_else(|| {
                TraceError::validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            graph.add_edge(*from, to, ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        TraceError::validation(format!(
            "cycle detected involving step '{}'",
            graph[cycle.node_id()]
        ))
    })?;

    Ok(sorted.into_iter().map(|idx| graph[idx]).collect())
}

/// Indices of steps eligible for dispatch.
///
/// A step is ready when it is `pending`, not in `failed`, and every one of
/// its dependencies is in `completed`. Order follows the step list.
pub fn ready_set(
    steps: &[StepExecution],
    completed: &HashSet<String>,
    failed: &HashSet<String>,
) -> Vec<usize> {
    steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status == StepStatus::Pending && !failed.contains(&s.id))
        .filter(|(_, s)| s.dependencies.iter().all(|d| completed.contains(d)))
        .map(|(i, _)| i)
        .collect()
}
