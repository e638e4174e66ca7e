//! Task runner
//!
//! Executes one task's workflows strictly sequentially: a later workflow
//! observes every completed side-effect of the earlier ones. A workflow
//! failure is logged and the task continues; the abort signal is observed
//! between workflows (and, via the workflow runner, between steps).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use codeloom_core::executor::StepExecutor;
use codeloom_core::io::ContentStore;
use codeloom_core::llm::CompletionClient;
use codeloom_core::runner::{ProgressReporter, WorkflowRunner};
use codeloom_core::types::{ExecutionResults, Task, TaskStatus};

/// Ephemeral run view of one task. Lives only for the duration of a run;
/// never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub task_id: String,
    pub is_running: bool,
    /// 0..=1, advanced by 1/totalWorkflows per finished workflow.
    pub progress: f64,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub current_workflow_index: usize,
    pub total_workflows: usize,
}

impl TaskExecution {
    pub fn begin(task_id: impl Into<String>, total_workflows: usize) -> Self {
        Self {
            task_id: task_id.into(),
            is_running: true,
            progress: 0.0,
            start_time: Utc::now(),
            end_time: None,
            current_workflow_index: 0,
            total_workflows,
        }
    }
}

/// Task runner knobs.
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    /// Cooperative pause between workflows; a throttle for downstream
    /// completion endpoints, not a correctness requirement.
    pub inter_workflow_pause: Duration,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            inter_workflow_pause: Duration::from_millis(500),
        }
    }
}

/// Terminal outcome of one task run.
#[derive(Debug)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub results: ExecutionResults,
    pub cancelled: bool,
}

/// Executes the workflows of one task sequentially.
pub struct TaskRunner {
    content: Arc<dyn ContentStore>,
    client: Arc<dyn CompletionClient>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    config: TaskRunnerConfig,
}

impl TaskRunner {
    pub fn new(content: Arc<dyn ContentStore>, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            content,
            client,
            reporter: None,
            config: TaskRunnerConfig::default(),
        }
    }

    /// Attach a workflow progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Override runner knobs.
    pub fn with_config(mut self, config: TaskRunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the task to a terminal status. `execution` (when given) is kept
    /// current for live polling.
    pub async fn run(
        &self,
        task: &Task,
        execution: Option<Arc<RwLock<TaskExecution>>>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let workflows = task.template.ordered_workflows();
        let total = workflows.len();
        let mut results = ExecutionResults::begin(total);
        let mut cancelled = false;

        tracing::info!(
            task_id = %task.id,
            task_name = %task.name,
            workflows = total,
            "task execution started"
        );

        let mut workflow_runner =
            WorkflowRunner::new(StepExecutor::new(self.content.clone(), self.client.clone()));
        if let Some(reporter) = &self.reporter {
            workflow_runner = workflow_runner.with_reporter(reporter.clone());
        }

        for (index, workflow) in workflows.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            if let Some(execution) = &execution {
                execution.write().await.current_workflow_index = index;
            }
            tracing::info!(
                task_id = %task.id,
                workflow_id = %workflow.id,
                index,
                total,
                "task workflow started"
            );

            match workflow_runner.run(workflow, cancel).await {
                Ok(outcome) if outcome.cancelled => {
                    cancelled = true;
                }
                Ok(outcome) => {
                    if outcome.completed {
                        results.completed_workflows += 1;
                    } else {
                        results.failed_workflows += 1;
                        tracing::warn!(
                            task_id = %task.id,
                            workflow_id = %workflow.id,
                            "workflow failed; task continues"
                        );
                    }
                }
                Err(err) => {
                    results.failed_workflows += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        workflow_id = %workflow.id,
                        error = %err,
                        "workflow rejected; task continues"
                    );
                }
            }
            if cancelled {
                break;
            }

            if let Some(execution) = &execution {
                execution.write().await.progress = (index + 1) as f64 / total.max(1) as f64;
            }

            if index + 1 < total {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.inter_workflow_pause) => {}
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        results.finish();
        let status = terminal_status(&results, cancelled);
        if let Some(execution) = &execution {
            let mut execution = execution.write().await;
            execution.is_running = false;
            execution.end_time = results.end_time;
        }
        tracing::info!(
            task_id = %task.id,
            status = ?status,
            completed = results.completed_workflows,
            failed = results.failed_workflows,
            duration_ms = results.duration.unwrap_or_default(),
            "task execution finished"
        );

        TaskOutcome {
            status,
            results,
            cancelled,
        }
    }
}

/// Any completed workflow advances the task to `Completed`; `Failed`
/// requires every workflow to have failed. A stopped run goes back to
/// `Idle` rather than counting as a failure.
fn terminal_status(results: &ExecutionResults, cancelled: bool) -> TaskStatus {
    if cancelled {
        TaskStatus::Idle
    } else if results.completed_workflows > 0 || results.failed_workflows == 0 {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    }
}
