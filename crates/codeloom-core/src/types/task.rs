//! Task type definitions
//!
//! A Task (a "workflow group" in the configuration documents) is a runnable
//! instance of a template: the user-facing unit of scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkflowTemplate;

/// Task lifecycle status.
///
/// `Running` is runtime-only: the configuration store reverts it to `Idle`
/// on save, so a process restart never resurrects phantom executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Aggregate outcome of a task's most recent run. Persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResults {
    pub total_workflows: usize,
    pub completed_workflows: usize,
    pub failed_workflows: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl ExecutionResults {
    /// Open a fresh results record at run start.
    pub fn begin(total_workflows: usize) -> Self {
        Self {
            total_workflows,
            completed_workflows: 0,
            failed_workflows: 0,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
        }
    }

    /// Close the record, stamping end time and duration.
    pub fn finish(&mut self) {
        let end = Utc::now();
        self.duration = Some((end - self.start_time).num_milliseconds());
        self.end_time = Some(end);
    }
}

/// A runnable instance of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: WorkflowTemplate,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_results: Option<ExecutionResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: impl Into<String>, template: WorkflowTemplate) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            template,
            status: TaskStatus::Idle,
            execution_results: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Whether the scheduler can admit this task: at least one workflow
    /// holding at least one step.
    pub fn is_executable(&self) -> bool {
        self.template.workflows.iter().any(|w| !w.steps.is_empty())
    }

    /// Total step count across all workflows.
    pub fn total_steps(&self) -> usize {
        self.template.workflows.iter().map(|w| w.steps.len()).sum()
    }
}
