//! Dependency-graph validation and topological ordering
//!
//! The runner refuses to execute a workflow whose step graph is not a DAG;
//! everything here runs before any step does.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::types::{Step, Workflow};

/// Graph validation errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("workflow has no steps")]
    EmptyWorkflow,

    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("step '{0}' depends on undefined step '{1}'")]
    MissingDependency(String, String),

    #[error("dependency graph contains a cycle involving step: {0}")]
    CycleDetected(String),

    #[error("step '{0}' input '{1}' depends on undefined step '{2}'")]
    InputDependencyMissing(String, String, String),

    #[error("step '{0}' input '{1}' depends on step '{2}', which does not run earlier")]
    InputDependencyOrder(String, String, String),

    #[error("unknown step: {0}")]
    UnknownStep(String),
}

/// Validate a workflow's step graph: non-empty, unique ids, resolvable
/// dependencies, acyclic.
pub fn validate(workflow: &Workflow) -> Result<(), GraphError> {
    if workflow.steps.is_empty() {
        return Err(GraphError::EmptyWorkflow);
    }

    let mut seen_ids = HashSet::new();
    for step in &workflow.steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(GraphError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &workflow.steps {
        for dep in &step.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                return Err(GraphError::MissingDependency(step.id.clone(), dep.clone()));
            }
        }

        for input in &step.config.file_inputs {
            let Some(dep) = input.depends_on.as_deref() else {
                continue;
            };
            let Some(upstream) = workflow.get_step(dep) else {
                return Err(GraphError::InputDependencyMissing(
                    step.id.clone(),
                    input.name.clone(),
                    dep.to_string(),
                ));
            };
            if upstream.order >= step.order {
                return Err(GraphError::InputDependencyOrder(
                    step.id.clone(),
                    input.name.clone(),
                    dep.to_string(),
                ));
            }
        }
    }

    detect_cycles(workflow)?;
    Ok(())
}

/// Detect cycles in the dependency graph using DFS.
fn detect_cycles(workflow: &Workflow) -> Result<(), GraphError> {
    // Adjacency: step -> its dependents
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &workflow.steps {
        adj.entry(step.id.as_str()).or_default();
        for dep in &step.dependencies {
            adj.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        adj: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        visited.insert(node);
        rec_stack.insert(node);

        if let Some(neighbors) = adj.get(node) {
            for &neighbor in neighbors {
                if !visited.contains(neighbor) {
                    if let Some(cycle_node) = dfs(neighbor, adj, visited, rec_stack) {
                        return Some(cycle_node);
                    }
                } else if rec_stack.contains(neighbor) {
                    return Some(neighbor);
                }
            }
        }

        rec_stack.remove(node);
        None
    }

    for step in &workflow.steps {
        if !visited.contains(step.id.as_str()) {
            if let Some(cycle_node) = dfs(step.id.as_str(), &adj, &mut visited, &mut rec_stack) {
                return Err(GraphError::CycleDetected(cycle_node.to_string()));
            }
        }
    }

    Ok(())
}

/// Compute the execution order: a stable topological sort with ties broken
/// by ascending `order` (then id, so the result is fully deterministic).
///
/// Validates the graph first; a cyclic or malformed workflow never yields
/// an order.
pub fn execution_order(workflow: &Workflow) -> Result<Vec<&Step>, GraphError> {
    validate(workflow)?;

    let steps_by_id: HashMap<&str, &Step> =
        workflow.steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut remaining_deps: HashMap<&str, HashSet<&str>> = workflow
        .steps
        .iter()
        .map(|s| {
            (
                s.id.as_str(),
                s.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut ordered = Vec::with_capacity(workflow.steps.len());
    while !remaining_deps.is_empty() {
        let mut ready: Vec<&Step> = remaining_deps
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| steps_by_id[*id])
            .collect();
        // validate() already rejected cycles, so some step is always ready
        ready.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        let next = ready[0];
        remaining_deps.remove(next.id.as_str());
        for deps in remaining_deps.values_mut() {
            deps.remove(next.id.as_str());
        }
        ordered.push(next);
    }

    Ok(ordered)
}

/// The ids of every step transitively downstream of `start` (excluding
/// `start` itself).
pub fn descendants(workflow: &Workflow, start: &str) -> Result<HashSet<String>, GraphError> {
    if workflow.get_step(start).is_none() {
        return Err(GraphError::UnknownStep(start.to_string()));
    }

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &workflow.steps {
        for dep in &step.dependencies {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut result = HashSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if let Some(children) = dependents.get(node) {
            for &child in children {
                if result.insert(child.to_string()) {
                    stack.push(child);
                }
            }
        }
    }
    Ok(result)
}
