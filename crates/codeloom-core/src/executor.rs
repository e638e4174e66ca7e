//! Step executor
//!
//! Given a step and the results of its upstream dependencies, the executor
//! resolves file paths, renders prompts, calls the completion transport,
//! persists the extracted code, and produces a [`StepResult`]. It never
//! propagates an error into the workflow runner: every failure becomes a
//! `StepResult { success: false }` with a human-readable cause.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::io::{ContentStore, ContentStoreError};
use crate::llm::{extract_code_block, ChatMessage, CompletionClient, LlmError};
use crate::materialize::join_path;
use crate::prompt::{render_prompt_inputs, PromptError, PromptSegment};
use crate::types::{ApiEndpoint, InputSource, Step, StepResult};

const MAX_LOG_TEXT_CHARS: usize = 2_000;

pub(crate) fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

/// Step execution errors. Converted into failed `StepResult`s at the
/// executor boundary; the variants mirror the user-visible taxonomy.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid step config: {0}")]
    ConfigInvalid(String),
    #[error("dependency missing: {0}")]
    DependencyMissing(String),
    #[error("input file missing: {0}")]
    InputMissing(String),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("output write failed: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<PromptError> for ExecError {
    fn from(err: PromptError) -> Self {
        Self::ConfigInvalid(err.to_string())
    }
}

/// What to do when the output file already exists.
///
/// The canonical paths overwrite unconditionally; the strict variant is a
/// policy flag and is not wired to any route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    #[default]
    Overwrite,
    FailIfExists,
}

/// Executes one step against a content store and a completion transport.
pub struct StepExecutor {
    content: Arc<dyn ContentStore>,
    client: Arc<dyn CompletionClient>,
    overwrite: OverwritePolicy,
}

impl StepExecutor {
    pub fn new(content: Arc<dyn ContentStore>, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            content,
            client,
            overwrite: OverwritePolicy::default(),
        }
    }

    /// Set the overwrite policy
    pub fn with_overwrite_policy(mut self, overwrite: OverwritePolicy) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Execute a step. `prior` must hold the results of every dependency
    /// that already ran in this run.
    pub async fn execute(
        &self,
        step: &Step,
        prior: &HashMap<String, StepResult>,
        cancel: &CancellationToken,
    ) -> StepResult {
        match self.try_execute(step, prior, cancel).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    step_id = %step.id,
                    error = %err,
                    "step execution failed"
                );
                StepResult::failure(err.to_string())
            }
        }
    }

    async fn try_execute(
        &self,
        step: &Step,
        prior: &HashMap<String, StepResult>,
        cancel: &CancellationToken,
    ) -> Result<StepResult, ExecError> {
        validate_config(step)?;
        let name_to_path = resolve_file_inputs(step, prior)?;
        let segments = render_prompt_inputs(&step.config.prompt_inputs, &name_to_path)?;

        self.run_segments(
            &segments,
            &step.config.api_endpoint,
            &step.config.output_folder,
            &step.config.output_file_name,
            cancel,
        )
        .await
    }

    /// Materialize a rendered segment sequence, invoke the transport, and
    /// persist the extracted code. Shared by the step path and the one-off
    /// process routes of the control surface.
    pub async fn run_segments(
        &self,
        segments: &[PromptSegment],
        endpoint: &ApiEndpoint,
        output_folder: &str,
        output_file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<StepResult, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let payload = self.materialize_segments(segments).await?;
        tracing::debug!(
            segment_count = segments.len(),
            payload = %truncate_for_log(&payload, MAX_LOG_TEXT_CHARS),
            "completion payload assembled"
        );

        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let completion = self
            .client
            .complete(vec![ChatMessage::user(payload)], endpoint)
            .await?;
        let code = extract_code_block(&completion.text);

        let output_path = join_path(output_folder, output_file_name);
        if self.overwrite == OverwritePolicy::FailIfExists
            && self.content.read_file(&output_path).await.is_ok()
        {
            return Err(ExecError::Io(format!(
                "output already exists: {}",
                output_path
            )));
        }

        self.content
            .ensure_dir(output_folder)
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;
        self.content
            .write_file(&output_path, code.as_bytes())
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        let message = match completion.warning {
            Some(warning) => format!("completed with warning: {}", warning),
            None => "completed".to_string(),
        };
        tracing::info!(
            path = %output_path,
            bytes = code.len(),
            "step output persisted"
        );
        Ok(StepResult::completed(output_path, code, message))
    }

    /// Prompt segments contribute their text; file segments contribute the
    /// full contents of the named file, read fresh. Joined with newlines.
    async fn materialize_segments(
        &self,
        segments: &[PromptSegment],
    ) -> Result<String, ExecError> {
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                PromptSegment::Prompt(text) => parts.push(text.clone()),
                PromptSegment::File(path) => {
                    let content = self.content.read_file(path).await.map_err(|e| match e {
                        ContentStoreError::InputMissing(p) => ExecError::InputMissing(p),
                        other => ExecError::Io(other.to_string()),
                    })?;
                    parts.push(content);
                }
            }
        }
        Ok(parts.join("\n"))
    }
}

fn validate_config(step: &Step) -> Result<(), ExecError> {
    let config = &step.config;
    if config.file_inputs.is_empty() {
        return Err(ExecError::ConfigInvalid(
            "step has no file inputs".to_string(),
        ));
    }
    if config.prompt_inputs.is_empty() {
        return Err(ExecError::ConfigInvalid(
            "step has no prompt inputs".to_string(),
        ));
    }
    if config.output_folder.trim().is_empty() {
        return Err(ExecError::ConfigInvalid(
            "output folder is not set".to_string(),
        ));
    }
    if config.output_file_name.trim().is_empty() {
        return Err(ExecError::ConfigInvalid(
            "output file name is not set".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for input in &config.file_inputs {
        if !seen.insert(input.name.as_str()) {
            return Err(ExecError::ConfigInvalid(format!(
                "duplicate file input name '{}'",
                input.name
            )));
        }
    }
    Ok(())
}

/// Resolve every file input to a concrete path: dependency-backed inputs
/// consume the upstream result's output path, the rest use their own path
/// verbatim.
fn resolve_file_inputs(
    step: &Step,
    prior: &HashMap<String, StepResult>,
) -> Result<HashMap<String, String>, ExecError> {
    let mut name_to_path = HashMap::new();
    for input in &step.config.file_inputs {
        let resolved = match input.source() {
            InputSource::Dependency(dep_id) => {
                let result = prior.get(dep_id).ok_or_else(|| {
                    ExecError::DependencyMissing(format!(
                        "input '{}' depends on step '{}', which has no result",
                        input.name, dep_id
                    ))
                })?;
                if !result.success {
                    return Err(ExecError::DependencyMissing(format!(
                        "input '{}' depends on step '{}', which failed: {}",
                        input.name, dep_id, result.message
                    )));
                }
                result
                    .output_path()
                    .ok_or_else(|| {
                        ExecError::DependencyMissing(format!(
                            "input '{}' depends on step '{}', which produced no output path",
                            input.name, dep_id
                        ))
                    })?
                    .to_string()
            }
            InputSource::Path(path) => {
                if path.trim().is_empty() {
                    return Err(ExecError::ConfigInvalid(format!(
                        "file input '{}' has no path",
                        input.name
                    )));
                }
                path.to_string()
            }
        };
        name_to_path.insert(input.name.clone(), resolved);
    }
    Ok(name_to_path)
}
