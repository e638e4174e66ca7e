//! # Codeloom Core
//!
//! Core abstractions and deterministic logic for the Codeloom engine.
//!
//! This crate contains:
//! - Step / Workflow / Template / Task definitions
//! - Dependency-graph validation and topological ordering
//! - Prompt rendering and per-step I/O marshalling
//! - The step executor and workflow runner
//! - Template materialization over selected source files
//!
//! This crate does NOT care about:
//! - Which HTTP framework serves the control API
//! - How completion transports reach their vendors
//! - Where configuration documents are persisted

pub mod executor;
pub mod graph;
pub mod io;
pub mod llm;
pub mod materialize;
pub mod prompt;
pub mod runner;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::executor::{ExecError, OverwritePolicy, StepExecutor};
    pub use crate::graph::{descendants, execution_order, validate, GraphError};
    pub use crate::io::{ContentStore, ContentStoreError};
    pub use crate::llm::{
        extract_code_block, ChatMessage, Completion, CompletionClient, FinishReason, LlmError,
    };
    pub use crate::materialize::{materialize, MaterializeOptions, Selection};
    pub use crate::prompt::{render_prompt_inputs, PromptSegment};
    pub use crate::runner::{
        ProgressEvent, ProgressReporter, RunState, StepRunState, WorkflowOutcome, WorkflowRunner,
    };
    pub use crate::types::{
        ApiEndpoint, ExecutionResults, FileInput, InputSource, ModelKind, PromptInput, Step,
        StepConfig, StepResult, StepResultData, StepStatus, Task, TaskStatus, Workflow,
        WorkflowTemplate,
    };
}

// Re-export key types at crate root
pub use executor::{ExecError, OverwritePolicy, StepExecutor};
pub use graph::GraphError;
pub use io::{ContentStore, ContentStoreError};
pub use llm::{ChatMessage, Completion, CompletionClient, FinishReason, LlmError};
pub use runner::{ProgressEvent, ProgressReporter, RunState, WorkflowOutcome, WorkflowRunner};
pub use types::{
    ApiEndpoint, ModelKind, Step, StepResult, StepStatus, Task, TaskStatus, Workflow,
    WorkflowTemplate,
};
