//! Workflow runner
//!
//! Drives a workflow's steps in stable topological order. Steps run
//! sequentially: the observable effect of any completed step precedes
//! reads by its dependents, and per-task resource usage stays predictable.
//! Run state lives in a per-run [`RunState`] map; the persisted workflow
//! graph is never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::executor::StepExecutor;
use crate::graph::{descendants, execution_order, validate, GraphError};
use crate::types::{Step, StepResult, StepStatus, Workflow};

/// Per-step runtime record.
#[derive(Debug, Clone, Default)]
pub struct StepRunState {
    pub status: StepStatus,
    pub result: Option<StepResult>,
}

/// Mutable run state of one workflow execution, keyed by step id.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    steps: HashMap<String, StepRunState>,
}

impl RunState {
    /// Fresh state with every step pending.
    pub fn for_workflow(workflow: &Workflow) -> Self {
        Self {
            steps: workflow
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepRunState::default()))
                .collect(),
        }
    }

    pub fn status(&self, step_id: &str) -> StepStatus {
        self.steps
            .get(step_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.get(step_id).and_then(|s| s.result.as_ref())
    }

    /// Snapshot of all available results, as the executor's `prior` map.
    pub fn results(&self) -> HashMap<String, StepResult> {
        self.steps
            .iter()
            .filter_map(|(id, s)| s.result.clone().map(|r| (id.clone(), r)))
            .collect()
    }

    pub fn set_running(&mut self, step_id: &str) {
        if let Some(s) = self.steps.get_mut(step_id) {
            s.status = StepStatus::Running;
        }
    }

    /// Record a step outcome; status follows `result.success`.
    pub fn finish(&mut self, step_id: &str, result: StepResult) {
        if let Some(s) = self.steps.get_mut(step_id) {
            s.status = if result.success {
                StepStatus::Success
            } else {
                StepStatus::Error
            };
            s.result = Some(result);
        }
    }

    /// Mark a step skipped, naming the failed ancestor in the message.
    pub fn skip(&mut self, step_id: &str, message: impl Into<String>) {
        if let Some(s) = self.steps.get_mut(step_id) {
            s.status = StepStatus::Skipped;
            s.result = Some(StepResult::failure(message));
        }
    }

    /// Reset a step back to pending with no result.
    pub fn reset(&mut self, step_id: &str) {
        if let Some(s) = self.steps.get_mut(step_id) {
            s.status = StepStatus::Pending;
            s.result = None;
        }
    }

    /// Steps in a terminal state (success, error, or skipped).
    pub fn terminal_count(&self) -> usize {
        self.steps
            .values()
            .filter(|s| s.status.is_terminal())
            .count()
    }

    pub fn all_success(&self) -> bool {
        self.steps
            .values()
            .all(|s| s.status == StepStatus::Success)
    }
}

/// Realtime workflow progress event.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub workflow_id: String,
    pub step_id: Option<String>,
    /// Phase label, e.g. step_started/step_completed/step_skipped.
    pub phase: String,
    /// Fraction of steps in a terminal state, 0..=1.
    pub progress: f64,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        workflow_id: impl Into<String>,
        step_id: Option<String>,
        phase: impl Into<String>,
        progress: f64,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id,
            phase: phase.into(),
            progress,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Sink interface for progress reporting.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, event: ProgressEvent) -> Result<(), String>;
}

/// Outcome of one workflow run.
#[derive(Debug)]
pub struct WorkflowOutcome {
    /// Every step finished with success.
    pub completed: bool,
    /// The run was interrupted by the cancellation token.
    pub cancelled: bool,
    pub state: RunState,
}

/// Drives a workflow's steps against a [`StepExecutor`].
pub struct WorkflowRunner {
    executor: StepExecutor,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl WorkflowRunner {
    pub fn new(executor: StepExecutor) -> Self {
        Self {
            executor,
            reporter: None,
        }
    }

    /// Attach a realtime progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Execute every step of the workflow in topological order.
    ///
    /// Rejects cyclic or malformed graphs before any step runs. Dependency
    /// failures skip the dependent; cancellation is observed between steps.
    pub async fn run(
        &self,
        workflow: &Workflow,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, GraphError> {
        let order = execution_order(workflow)?;
        let total = order.len();
        let mut state = RunState::for_workflow(workflow);
        let mut cancelled = false;

        tracing::info!(
            workflow_id = %workflow.id,
            steps = total,
            "workflow execution started"
        );

        for step in order {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.run_step(workflow, step, &mut state, total, cancel, &mut cancelled)
                .await;
            if cancelled {
                break;
            }
        }

        let completed = !cancelled && state.all_success();
        let phase = if cancelled {
            "workflow_cancelled"
        } else if completed {
            "workflow_completed"
        } else {
            "workflow_failed"
        };
        tracing::info!(workflow_id = %workflow.id, phase, "workflow execution finished");
        self.report(ProgressEvent::new(
            &workflow.id,
            None,
            phase,
            progress_of(&state, total),
        ))
        .await;

        Ok(WorkflowOutcome {
            completed,
            cancelled,
            state,
        })
    }

    /// Re-run exactly one step, reusing the existing dependency results.
    ///
    /// A dependency that is not currently successful is a warning, not a
    /// refusal: the caller asked for this step specifically.
    pub async fn rerun_step(
        &self,
        workflow: &Workflow,
        step_id: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<StepResult, GraphError> {
        validate(workflow)?;
        let step = workflow
            .get_step(step_id)
            .ok_or_else(|| GraphError::UnknownStep(step_id.to_string()))?;

        for dep in &step.dependencies {
            if state.status(dep) != StepStatus::Success {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    step_id = %step_id,
                    dependency = %dep,
                    "re-running step although a dependency is not successful"
                );
            }
        }

        state.reset(step_id);
        state.set_running(step_id);
        self.report(ProgressEvent::new(
            &workflow.id,
            Some(step_id.to_string()),
            "step_started",
            progress_of(state, workflow.steps.len()),
        ))
        .await;

        let prior = state.results();
        let result = self.executor.execute(step, &prior, cancel).await;
        state.finish(step_id, result.clone());
        self.report_step_end(workflow, step, state, workflow.steps.len())
            .await;
        Ok(result)
    }

    /// Re-run a step and everything transitively downstream of it.
    ///
    /// The closure is reset first; dependencies outside the closure feed
    /// their still-good results in.
    pub async fn rerun_from(
        &self,
        workflow: &Workflow,
        start_id: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), GraphError> {
        let order = execution_order(workflow)?;
        let mut closure = descendants(workflow, start_id)?;
        closure.insert(start_id.to_string());

        for id in &closure {
            state.reset(id);
        }

        let total = workflow.steps.len();
        let mut cancelled = false;
        for step in order {
            if !closure.contains(&step.id) {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            self.run_step(workflow, step, state, total, cancel, &mut cancelled)
                .await;
            if cancelled {
                break;
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        workflow: &Workflow,
        step: &Step,
        state: &mut RunState,
        total: usize,
        cancel: &CancellationToken,
        cancelled: &mut bool,
    ) {
        if let Some(failed_dep) = step
            .dependencies
            .iter()
            .find(|dep| state.status(dep) != StepStatus::Success)
        {
            let message = format!("skipped: upstream step '{}' did not succeed", failed_dep);
            tracing::warn!(
                workflow_id = %workflow.id,
                step_id = %step.id,
                dependency = %failed_dep,
                "step skipped"
            );
            state.skip(&step.id, message.clone());
            self.report(
                ProgressEvent::new(
                    &workflow.id,
                    Some(step.id.clone()),
                    "step_skipped",
                    progress_of(state, total),
                )
                .with_message(message),
            )
            .await;
            return;
        }

        state.set_running(&step.id);
        self.report(ProgressEvent::new(
            &workflow.id,
            Some(step.id.clone()),
            "step_started",
            progress_of(state, total),
        ))
        .await;

        let prior = state.results();
        let result = self.executor.execute(step, &prior, cancel).await;
        if !result.success && cancel.is_cancelled() {
            // Interruption, not failure: the step goes back to pending.
            state.reset(&step.id);
            *cancelled = true;
            return;
        }
        state.finish(&step.id, result);
        self.report_step_end(workflow, step, state, total).await;
    }

    async fn report_step_end(
        &self,
        workflow: &Workflow,
        step: &Step,
        state: &RunState,
        total: usize,
    ) {
        let (phase, message) = match state.result(&step.id) {
            Some(r) if r.success => ("step_completed", None),
            Some(r) => ("step_failed", Some(r.message.clone())),
            None => ("step_failed", None),
        };
        let mut event = ProgressEvent::new(
            &workflow.id,
            Some(step.id.clone()),
            phase,
            progress_of(state, total),
        );
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.report(event).await;
    }

    async fn report(&self, event: ProgressEvent) {
        if let Some(reporter) = &self.reporter {
            if let Err(err) = reporter.report(event).await {
                tracing::warn!("failed to report workflow progress: {}", err);
            }
        }
    }
}

fn progress_of(state: &RunState, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    state.terminal_count() as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ContentStore, ContentStoreError};
    use crate::llm::{ChatMessage, Completion, CompletionClient, FinishReason, LlmError};
    use crate::types::{ApiEndpoint, FileInput, PromptInput, StepConfig};
    use std::sync::Mutex;
    use tokio::sync::RwLock;

    struct MemoryStore {
        files: Mutex<HashMap<String, String>>,
    }

    impl MemoryStore {
        fn new(seed: &[(&str, &str)]) -> Self {
            Self {
                files: Mutex::new(
                    seed.iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
            }
        }

        fn get(&self, path: &str) -> Option<String> {
            self.files.lock().unwrap().get(path).cloned()
        }
    }

    #[async_trait]
    impl ContentStore for MemoryStore {
        async fn read_file(&self, path: &str) -> Result<String, ContentStoreError> {
            self.get(path)
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

    /// Echoes the payload back, optionally appending a configurable suffix.
    struct EchoClient {
        suffix: Mutex<String>,
    }

    impl EchoClient {
        fn new() -> Self {
            Self {
                suffix: Mutex::new(String::new()),
            }
        }

        fn set_suffix(&self, suffix: &str) {
            *self.suffix.lock().unwrap() = suffix.to_string();
        }
    }

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _endpoint: &ApiEndpoint,
        ) -> Result<Completion, LlmError> {
            let payload = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let suffix = self.suffix.lock().unwrap().clone();
            Ok(Completion::new(
                format!("```txt\n{}{}\n```", payload, suffix),
                FinishReason::Stop,
            ))
        }
    }

    /// Fails every call; for skip-propagation tests.
    struct FailingClient;

    #[async_trait]
    impl CompletionClient for FailingClient {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _endpoint: &ApiEndpoint,
        ) -> Result<Completion, LlmError> {
            Err(LlmError::Http("connection refused".to_string()))
        }
    }

    struct CollectReporter {
        events: Arc<RwLock<Vec<ProgressEvent>>>,
    }

    impl CollectReporter {
        fn new() -> Self {
            Self {
                events: Arc::new(RwLock::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ProgressReporter for CollectReporter {
        async fn report(&self, event: ProgressEvent) -> Result<(), String> {
            self.events.write().await.push(event);
            Ok(())
        }
    }

    fn chain_step(id: &str, order: u32, input: FileInput, deps: &[&str]) -> Step {
        Step::new(id, order)
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
            .with_config(StepConfig {
                file_inputs: vec![input],
                prompt_inputs: vec![PromptInput::new("{{in}}")],
                output_folder: "/tmp/out".to_string(),
                output_file_name: format!("{}.txt", id),
                api_endpoint: ApiEndpoint::ChatRelay,
            })
    }

    /// s1 -> s2 -> s3, each forwarding its upstream output.
    fn linear_workflow() -> Workflow {
        Workflow::new(
            "w1",
            "linear",
            vec![
                chain_step("s1", 0, FileInput::at_path("in", "/in/seed.txt"), &[]),
                chain_step("s2", 1, FileInput::from_step("in", "s1"), &["s1"]),
                chain_step("s3", 2, FileInput::from_step("in", "s2"), &["s2"]),
            ],
        )
    }

    fn runner(store: Arc<MemoryStore>, client: Arc<dyn CompletionClient>) -> WorkflowRunner {
        WorkflowRunner::new(StepExecutor::new(store, client))
    }

    #[test]
    fn test_linear_chain_forwards_content_to_the_end() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let run = runner(store.clone(), Arc::new(EchoClient::new()));

            let outcome = run
                .run(&linear_workflow(), &CancellationToken::new())
                .await
                .expect("run");

            assert!(outcome.completed);
            assert!(!outcome.cancelled);
            assert_eq!(store.get("/tmp/out/s3.txt").as_deref(), Some("seed"));
        });
    }

    #[test]
    fn test_cyclic_workflow_is_rejected_before_any_step() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let run = runner(store.clone(), Arc::new(EchoClient::new()));

            let mut workflow = linear_workflow();
            workflow.steps[0].dependencies = vec!["s3".to_string()];

            assert!(run
                .run(&workflow, &CancellationToken::new())
                .await
                .is_err());
            assert_eq!(store.get("/tmp/out/s1.txt"), None);
        });
    }

    #[test]
    fn test_failed_step_skips_downstream_with_named_ancestor() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let run = runner(store, Arc::new(FailingClient));

            let outcome = run
                .run(&linear_workflow(), &CancellationToken::new())
                .await
                .expect("run");

            assert!(!outcome.completed);
            assert_eq!(outcome.state.status("s1"), StepStatus::Error);
            assert_eq!(outcome.state.status("s2"), StepStatus::Skipped);
            assert_eq!(outcome.state.status("s3"), StepStatus::Skipped);
            let skip_message = &outcome.state.result("s2").expect("result").message;
            assert!(skip_message.contains("s1"));
        });
    }

    #[test]
    fn test_diamond_runs_in_order_and_joins_results() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let reporter = Arc::new(CollectReporter::new());
            let events_ref = reporter.events.clone();
            let run = runner(store, Arc::new(EchoClient::new())).with_reporter(reporter);

            let mut s4 = chain_step("s4", 3, FileInput::from_step("a", "s2"), &["s2", "s3"]);
            s4.config.file_inputs.push(FileInput::from_step("b", "s3"));
            s4.config.prompt_inputs = vec![PromptInput::new("{{a}} {{b}}")];
            let workflow = Workflow::new(
                "w1",
                "diamond",
                vec![
                    chain_step("s1", 0, FileInput::at_path("in", "/in/seed.txt"), &[]),
                    chain_step("s2", 1, FileInput::from_step("in", "s1"), &["s1"]),
                    chain_step("s3", 2, FileInput::from_step("in", "s1"), &["s1"]),
                    s4,
                ],
            );

            let outcome = run
                .run(&workflow, &CancellationToken::new())
                .await
                .expect("run");
            assert!(outcome.completed);

            let events = events_ref.read().await;
            let started: Vec<&str> = events
                .iter()
                .filter(|e| e.phase == "step_started")
                .filter_map(|e| e.step_id.as_deref())
                .collect();
            assert_eq!(started, vec!["s1", "s2", "s3", "s4"]);
        });
    }

    #[test]
    fn test_progress_is_monotonic_and_reaches_one() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let reporter = Arc::new(CollectReporter::new());
            let events_ref = reporter.events.clone();
            let run = runner(store, Arc::new(EchoClient::new())).with_reporter(reporter);

            run.run(&linear_workflow(), &CancellationToken::new())
                .await
                .expect("run");

            let events = events_ref.read().await;
            let mut last = 0.0;
            for event in events.iter() {
                assert!(event.progress + 1e-9 >= last, "progress went backwards");
                last = event.progress;
            }
            assert!((last - 1.0).abs() < 1e-9);
        });
    }

    #[test]
    fn test_rerun_from_resets_downstream_only() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let client = Arc::new(EchoClient::new());
            let run = runner(store.clone(), client.clone());

            let workflow = linear_workflow();
            let outcome = run
                .run(&workflow, &CancellationToken::new())
                .await
                .expect("run");
            let mut state = outcome.state;
            let s1_before = state.result("s1").cloned().expect("s1 result");

            client.set_suffix("+new");
            run.rerun_from(&workflow, "s2", &mut state, &CancellationToken::new())
                .await
                .expect("rerun");

            // s1 is untouched, s2/s3 reran and the new value flowed through.
            let s1_after = state.result("s1").cloned().expect("s1 result");
            assert_eq!(s1_before.message, s1_after.message);
            assert_eq!(
                s1_before.data.as_ref().unwrap().content,
                s1_after.data.as_ref().unwrap().content
            );
            let s3_content = store.get("/tmp/out/s3.txt").expect("s3 output");
            assert!(s3_content.contains("+new"));
            assert_eq!(state.status("s2"), StepStatus::Success);
            assert_eq!(state.status("s3"), StepStatus::Success);
        });
    }

    #[test]
    fn test_rerun_single_step_leaves_neighbors_alone() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let client = Arc::new(EchoClient::new());
            let run = runner(store.clone(), client.clone());

            let workflow = linear_workflow();
            let outcome = run
                .run(&workflow, &CancellationToken::new())
                .await
                .expect("run");
            let mut state = outcome.state;
            let s3_before = store.get("/tmp/out/s3.txt");

            client.set_suffix("+v2");
            let result = run
                .rerun_step(&workflow, "s2", &mut state, &CancellationToken::new())
                .await
                .expect("rerun");

            assert!(result.success);
            assert!(store.get("/tmp/out/s2.txt").unwrap().contains("+v2"));
            // s3 did not re-execute.
            assert_eq!(store.get("/tmp/out/s3.txt"), s3_before);
        });
    }

    #[test]
    fn test_rerun_step_proceeds_with_failed_dependency() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let run = runner(store, Arc::new(EchoClient::new()));

            let workflow = linear_workflow();
            let mut state = RunState::for_workflow(&workflow);
            // s1 never ran; re-running s2 is allowed but fails on the
            // missing dependency result.
            let result = run
                .rerun_step(&workflow, "s2", &mut state, &CancellationToken::new())
                .await
                .expect("rerun");
            assert!(!result.success);
            assert!(result.message.contains("dependency missing"));
        });
    }

    #[test]
    fn test_cancellation_between_steps_stops_the_run() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new(&[("/in/seed.txt", "seed")]));
            let run = runner(store.clone(), Arc::new(EchoClient::new()));

            let cancel = CancellationToken::new();
            cancel.cancel();
            let outcome = run
                .run(&linear_workflow(), &cancel)
                .await
                .expect("run");

            assert!(outcome.cancelled);
            assert!(!outcome.completed);
            assert_eq!(outcome.state.status("s1"), StepStatus::Pending);
            assert_eq!(store.get("/tmp/out/s1.txt"), None);
        });
    }
}
