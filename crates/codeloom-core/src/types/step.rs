//! Step type definitions
//!
//! A Step is one LLM-backed transformation unit: resolve inputs, render the
//! prompt, call the completion endpoint, persist the extracted code.

use serde::{Deserialize, Serialize};

/// Model selector for the direct streaming transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Qianwen,
    Deepseek,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qianwen => "qianwen",
            Self::Deepseek => "deepseek",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which completion transport a step goes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ApiEndpoint {
    /// Relay through the external chat endpoint; single response, no
    /// streaming, no continuation.
    ChatRelay,
    /// Stream token deltas straight from the model vendor, continuing on
    /// `finish_reason = length`.
    DirectStream { model: ModelKind },
}

impl Default for ApiEndpoint {
    fn default() -> Self {
        Self::ChatRelay
    }
}

/// One named file input of a step.
///
/// Exactly one of `path` / `depends_on` is effective: when `depends_on`
/// names an upstream step, `path` is ignored at execution time and the
/// upstream result's output path is consumed instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInput {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}

/// Tagged view of a file input's effective source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource<'a> {
    /// Read the file at this path verbatim.
    Path(&'a str),
    /// Consume the output path of this upstream step.
    Dependency(&'a str),
}

impl FileInput {
    /// Create an input backed by a concrete path.
    pub fn at_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            depends_on: None,
        }
    }

    /// Create an input consuming an upstream step's output.
    pub fn from_step(name: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            depends_on: Some(step_id.into()),
        }
    }

    /// The effective source of this input.
    pub fn source(&self) -> InputSource<'_> {
        match self.depends_on.as_deref() {
            Some(step_id) => InputSource::Dependency(step_id),
            None => InputSource::Path(&self.path),
        }
    }
}

/// One prompt fragment of a step.
///
/// `content` may contain `{{name}}` tokens referring to the step's file
/// inputs; `file_references` is advisory metadata kept for the editing
/// surface and plays no role in rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInput {
    pub content: String,
    #[serde(default)]
    pub file_references: Vec<String>,
}

impl PromptInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file_references: Vec::new(),
        }
    }
}

/// Executable configuration of a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    #[serde(default)]
    pub file_inputs: Vec<FileInput>,
    #[serde(default)]
    pub prompt_inputs: Vec<PromptInput>,
    #[serde(default)]
    pub output_folder: String,
    #[serde(default)]
    pub output_file_name: String,
    #[serde(default)]
    pub api_endpoint: ApiEndpoint,
}

/// A single step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Stable identifier, unique within the workflow
    pub id: String,
    /// Tie-break rank within a topological level; unique within the workflow
    #[serde(default)]
    pub order: u32,
    /// IDs of sibling steps this step depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub config: StepConfig,
}

impl Step {
    /// Create a new step with an empty config.
    pub fn new(id: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            order,
            dependencies: Vec::new(),
            config: StepConfig::default(),
        }
    }

    /// Add dependencies
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the executable configuration
    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// The joined output path of this step.
    pub fn output_path(&self) -> String {
        crate::materialize::join_path(&self.config.output_folder, &self.config.output_file_name)
    }
}

/// Runtime status of a step within one run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

impl StepStatus {
    /// Terminal states count toward workflow progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Skipped)
    }
}
