//! Workflow and template definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Step;

/// A named DAG of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    /// Look up a step by id.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// A frozen, reusable blueprint: a set of workflows plus their run order.
///
/// Unlike a workflow, a template may be referenced by many tasks; tasks
/// embed a deep copy so later template edits never mutate past runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    /// Workflow ids in run order; workflows absent from this list run last,
    /// in declaration order.
    #[serde(default)]
    pub workflow_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, workflows: Vec<Workflow>) -> Self {
        let now = Utc::now();
        let workflow_order = workflows.iter().map(|w| w.id.clone()).collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            workflows,
            workflow_order,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Workflows in run order.
    pub fn ordered_workflows(&self) -> Vec<&Workflow> {
        let mut ordered: Vec<&Workflow> = self
            .workflow_order
            .iter()
            .filter_map(|id| self.workflows.iter().find(|w| &w.id == id))
            .collect();
        for workflow in &self.workflows {
            if !ordered.iter().any(|w| w.id == workflow.id) {
                ordered.push(workflow);
            }
        }
        ordered
    }
}
