//! Scheduler
//!
//! Admits tasks into a process-wide pool bounded by
//! `max_concurrent_tasks`. Admission is strict and unqueued: a request
//! over the cap is rejected, never parked. Batch execution drains the
//! idle set with up to cap index-pulling workers. Not durable: a process
//! restart reverts every running task to idle via the configuration
//! store's sanitization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use codeloom_core::types::{Task, TaskStatus};

use crate::{TaskExecution, TaskOutcome, TaskRunner};

/// Scheduler knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Hard cap on concurrently executing tasks.
    pub max_concurrent_tasks: usize,
    /// Idle pause between a batch worker's successive tasks.
    pub inter_task_pause: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 6,
            inter_task_pause: Duration::from_millis(200),
        }
    }
}

/// Scheduling errors
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("concurrency limit reached: {running} of {max} tasks executing")]
    ConcurrencyLimit { running: usize, max: usize },
    #[error("task is already executing: {0}")]
    AlreadyRunning(String),
    #[error("task is not executing: {0}")]
    NotRunning(String),
    #[error("task has no executable workflows: {0}")]
    NotExecutable(String),
}

/// One task's outcome within a batch run.
#[derive(Debug)]
pub struct BatchResult {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

struct Slot {
    execution: Arc<RwLock<TaskExecution>>,
    cancel: CancellationToken,
}

/// Process-wide task scheduler.
pub struct Scheduler {
    runner: Arc<TaskRunner>,
    config: SchedulerConfig,
    running: Arc<Mutex<HashMap<String, Slot>>>,
    drained: Arc<Notify>,
}

impl Scheduler {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self::with_config(runner, SchedulerConfig::default())
    }

    pub fn with_config(runner: Arc<TaskRunner>, config: SchedulerConfig) -> Self {
        Self {
            runner,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Admit and execute one task. Rejected with `ConcurrencyLimit` when
    /// the pool is full; the scheduler does not queue.
    pub async fn execute(&self, task: Task) -> Result<JoinHandle<TaskOutcome>, ScheduleError> {
        if !task.is_executable() {
            return Err(ScheduleError::NotExecutable(task.id));
        }
        let slot = self.admit(&task).await?;
        Ok(self.spawn_run(task, slot))
    }

    /// Execute every idle-and-executable task from the given set, with up
    /// to cap concurrent workers pulling tasks by index.
    pub async fn batch_execute_all(self: &Arc<Self>, tasks: Vec<Task>) -> Vec<BatchResult> {
        let batch: Vec<Task> = tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Idle && t.is_executable())
            .collect();
        if batch.is_empty() {
            return Vec::new();
        }

        let worker_count = self.config.max_concurrent_tasks.min(batch.len());
        tracing::info!(
            tasks = batch.len(),
            workers = worker_count,
            "batch execution started"
        );

        let batch = Arc::new(batch);
        let next = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let scheduler = Arc::clone(self);
            let batch = batch.clone();
            let next = next.clone();
            let results = results.clone();
            workers.push(tokio::spawn(async move {
                let mut first = true;
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= batch.len() {
                        break;
                    }
                    if !first {
                        tokio::time::sleep(scheduler.config.inter_task_pause).await;
                    }
                    first = false;

                    let task = batch[index].clone();
                    let task_id = task.id.clone();
                    tracing::info!(worker, task_id = %task_id, index, "batch worker picked task");
                    match scheduler.run_admitted(task).await {
                        Some(outcome) => {
                            results.lock().await.push(BatchResult { task_id, outcome })
                        }
                        None => {
                            tracing::warn!(
                                worker,
                                task_id = %task_id,
                                "task already executing; batch worker skipped it"
                            );
                        }
                    }
                }
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }

        let mut results = Arc::try_unwrap(results)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        results.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tracing::info!(finished = results.len(), "batch execution finished");
        results
    }

    /// Request a stop; the runner observes it at the next boundary.
    pub async fn stop(&self, task_id: &str) -> Result<(), ScheduleError> {
        let running = self.running.lock().await;
        let slot = running
            .get(task_id)
            .ok_or_else(|| ScheduleError::NotRunning(task_id.to_string()))?;
        slot.cancel.cancel();
        tracing::info!(task_id = %task_id, "stop requested");
        Ok(())
    }

    /// Stop every executing task and wait until all have wound down.
    pub async fn stop_all(&self) {
        {
            let running = self.running.lock().await;
            tracing::info!(tasks = running.len(), "stop-all requested");
            for slot in running.values() {
                slot.cancel.cancel();
            }
        }
        loop {
            let notified = self.drained.notified();
            if self.running.lock().await.is_empty() {
                break;
            }
            notified.await;
        }
    }

    /// Live snapshots of every executing task.
    pub async fn executions(&self) -> Vec<TaskExecution> {
        let running = self.running.lock().await;
        let mut snapshots = Vec::with_capacity(running.len());
        for slot in running.values() {
            snapshots.push(slot.execution.read().await.clone());
        }
        snapshots
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running.lock().await.contains_key(task_id)
    }

    async fn admit(&self, task: &Task) -> Result<Slot, ScheduleError> {
        let mut running = self.running.lock().await;
        if running.contains_key(&task.id) {
            return Err(ScheduleError::AlreadyRunning(task.id.clone()));
        }
        if running.len() >= self.config.max_concurrent_tasks {
            return Err(ScheduleError::ConcurrencyLimit {
                running: running.len(),
                max: self.config.max_concurrent_tasks,
            });
        }

        let execution = Arc::new(RwLock::new(TaskExecution::begin(
            &task.id,
            task.template.workflows.len(),
        )));
        let cancel = CancellationToken::new();
        running.insert(
            task.id.clone(),
            Slot {
                execution: execution.clone(),
                cancel: cancel.clone(),
            },
        );
        Ok(Slot { execution, cancel })
    }

    fn spawn_run(&self, task: Task, slot: Slot) -> JoinHandle<TaskOutcome> {
        let runner = self.runner.clone();
        let running = self.running.clone();
        let drained = self.drained.clone();
        tokio::spawn(async move {
            let outcome = runner
                .run(&task, Some(slot.execution), &slot.cancel)
                .await;
            running.lock().await.remove(&task.id);
            drained.notify_waiters();
            outcome
        })
    }

    /// Batch-worker path: waits for a free slot instead of rejecting, so
    /// the cap holds even while one-off executions come and go. Returns
    /// `None` when the task is already executing.
    async fn run_admitted(&self, task: Task) -> Option<TaskOutcome> {
        let slot = loop {
            let notified = self.drained.notified();
            match self.admit(&task).await {
                Ok(slot) => break slot,
                Err(ScheduleError::AlreadyRunning(_)) => return None,
                Err(_) => notified.await,
            }
        };

        let outcome = self
            .runner
            .run(&task, Some(slot.execution), &slot.cancel)
            .await;
        self.running.lock().await.remove(&task.id);
        self.drained.notify_waiters();
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codeloom_core::io::{ContentStore, ContentStoreError};
    use codeloom_core::llm::{ChatMessage, Completion, CompletionClient, FinishReason, LlmError};
    use codeloom_core::types::{
        ApiEndpoint, FileInput, PromptInput, Step, StepConfig, Workflow, WorkflowTemplate,
    };
    use crate::TaskRunnerConfig;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    struct MemoryStore {
        files: StdMutex<StdHashMap<String, String>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                files: StdMutex::new(StdHashMap::from([(
                    "/in/seed.txt".to_string(),
                    "seed".to_string(),
                )])),
            }
        }
    }

    #[async_trait]
    impl ContentStore for MemoryStore {
        async fn read_file(&self, path: &str) -> Result<String, ContentStoreError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ContentStoreError::InputMissing(path.to_string()))
        }

        async fn ensure_dir(&self, _path: &str) -> Result<(), ContentStoreError> {
            Ok(())
        }

        async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), ContentStoreError> {
            self.files.lock().unwrap().insert(
                path.to_string(),
                String::from_utf8_lossy(bytes).to_string(),
            );
            Ok(())
        }

        async fn list_files(
            &self,
            _root: &str,
            _extension: &str,
        ) -> Result<Vec<String>, ContentStoreError> {
            Ok(Vec::new())
        }
    }

    /// Tracks peak in-flight completions while sleeping a little.
    struct SlowClient {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl CompletionClient for SlowClient {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _endpoint: &ApiEndpoint,
        ) -> Result<Completion, LlmError> {
            let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let mut peak = self.peak.load(Ordering::SeqCst);
            while in_flight > peak {
                match self.peak.compare_exchange(
                    peak,
                    in_flight,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(actual) => peak = actual,
                }
            }
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            let payload = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion::new(payload, FinishReason::Stop))
        }
    }

    fn sample_task(name: &str) -> Task {
        let workflow = Workflow::new(
            format!("{}-w1", name),
            "W1",
            vec![Step::new("s1", 0).with_config(StepConfig {
                file_inputs: vec![FileInput::at_path("in", "/in/seed.txt")],
                prompt_inputs: vec![PromptInput::new("{{in}}")],
                output_folder: "/out".to_string(),
                output_file_name: format!("{}.txt", name),
                api_endpoint: ApiEndpoint::ChatRelay,
            })],
        );
        Task::new(name, WorkflowTemplate::new("t", vec![workflow]))
    }

    fn scheduler_with(
        client: Arc<dyn CompletionClient>,
        max_concurrent_tasks: usize,
    ) -> Arc<Scheduler> {
        let runner = Arc::new(
            TaskRunner::new(Arc::new(MemoryStore::new()), client).with_config(TaskRunnerConfig {
                inter_workflow_pause: Duration::from_millis(1),
            }),
        );
        Arc::new(Scheduler::with_config(
            runner,
            SchedulerConfig {
                max_concurrent_tasks,
                inter_task_pause: Duration::from_millis(1),
            },
        ))
    }

    fn slow_client(delay_ms: u64) -> (Arc<SlowClient>, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(SlowClient {
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
            delay: Duration::from_millis(delay_ms),
        });
        (client, peak)
    }

    #[test]
    fn test_batch_respects_concurrency_cap() {
        tokio_test::block_on(async {
            let (client, peak) = slow_client(20);
            let scheduler = scheduler_with(client, 2);

            let tasks: Vec<Task> = (0..5).map(|i| sample_task(&format!("t{}", i))).collect();
            let results = scheduler.batch_execute_all(tasks).await;

            assert_eq!(results.len(), 5);
            assert!(results
                .iter()
                .all(|r| r.outcome.status == TaskStatus::Completed));
            let observed_peak = peak.load(Ordering::SeqCst);
            assert!(observed_peak <= 2, "peak was {}", observed_peak);
            assert!(observed_peak >= 2, "workers never ran in parallel");
            assert_eq!(scheduler.running_count().await, 0);
        });
    }

    #[test]
    fn test_batch_skips_non_idle_and_empty_tasks() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(1);
            let scheduler = scheduler_with(client, 2);

            let mut completed = sample_task("done");
            completed.status = TaskStatus::Completed;
            let hollow = Task::new("hollow", WorkflowTemplate::new("t", vec![]));
            let runnable = sample_task("runnable");
            let runnable_id = runnable.id.clone();

            let results = scheduler
                .batch_execute_all(vec![completed, hollow, runnable])
                .await;
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].task_id, runnable_id);
        });
    }

    #[test]
    fn test_execute_rejects_over_the_cap_without_queueing() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(50);
            let scheduler = scheduler_with(client, 1);

            let first = scheduler.execute(sample_task("first")).await.expect("admit");
            let second = scheduler.execute(sample_task("second")).await;
            assert!(matches!(
                second,
                Err(ScheduleError::ConcurrencyLimit { running: 1, max: 1 })
            ));

            let outcome = first.await.expect("join");
            assert_eq!(outcome.status, TaskStatus::Completed);
            // Slot freed; admission works again.
            let third = scheduler.execute(sample_task("third")).await.expect("admit");
            third.await.expect("join");
        });
    }

    #[test]
    fn test_execute_rejects_duplicate_task() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(50);
            let scheduler = scheduler_with(client, 2);

            let task = sample_task("dup");
            let handle = scheduler.execute(task.clone()).await.expect("admit");
            let again = scheduler.execute(task).await;
            assert!(matches!(again, Err(ScheduleError::AlreadyRunning(_))));
            handle.await.expect("join");
        });
    }

    #[test]
    fn test_execute_rejects_empty_task() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(1);
            let scheduler = scheduler_with(client, 2);

            let hollow = Task::new("hollow", WorkflowTemplate::new("t", vec![]));
            assert!(matches!(
                scheduler.execute(hollow).await,
                Err(ScheduleError::NotExecutable(_))
            ));
        });
    }

    #[test]
    fn test_stop_one_interrupts_and_stop_unknown_errors() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(100);
            let scheduler = scheduler_with(client, 2);

            let task = sample_task("stoppable");
            let task_id = task.id.clone();
            let handle = scheduler.execute(task).await.expect("admit");

            assert!(matches!(
                scheduler.stop("ghost").await,
                Err(ScheduleError::NotRunning(_))
            ));
            scheduler.stop(&task_id).await.expect("stop");

            let outcome = handle.await.expect("join");
            assert!(outcome.cancelled);
            assert_eq!(scheduler.running_count().await, 0);
        });
    }

    #[test]
    fn test_stop_all_settles_when_everything_wound_down() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(100);
            let scheduler = scheduler_with(client, 3);

            let mut handles = Vec::new();
            for i in 0..3 {
                handles.push(
                    scheduler
                        .execute(sample_task(&format!("t{}", i)))
                        .await
                        .expect("admit"),
                );
            }
            // Give the spawned runs a moment to enter their first step.
            tokio::time::sleep(Duration::from_millis(10)).await;

            scheduler.stop_all().await;
            assert_eq!(scheduler.running_count().await, 0);
            for handle in handles {
                let outcome = handle.await.expect("join");
                assert!(outcome.cancelled || outcome.status == TaskStatus::Completed);
            }
        });
    }

    #[test]
    fn test_executions_snapshot_reflects_live_runs() {
        tokio_test::block_on(async {
            let (client, _) = slow_client(100);
            let scheduler = scheduler_with(client, 2);

            let task = sample_task("live");
            let task_id = task.id.clone();
            let handle = scheduler.execute(task).await.expect("admit");
            tokio::time::sleep(Duration::from_millis(10)).await;

            let snapshots = scheduler.executions().await;
            assert_eq!(snapshots.len(), 1);
            assert_eq!(snapshots[0].task_id, task_id);
            assert!(snapshots[0].is_running);
            assert!(scheduler.is_running(&task_id).await);

            handle.await.expect("join");
            assert!(scheduler.executions().await.is_empty());
        });
    }
}
