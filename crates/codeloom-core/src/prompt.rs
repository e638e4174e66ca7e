//! Prompt rendering
//!
//! Prompt contents may reference file inputs with `{{name}}` tokens. The
//! renderer scans each prompt left to right and emits an interleaved
//! segment sequence; the interleaving is observable by the completion
//! endpoint and must be preserved exactly.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::PromptInput;

/// One element of the rendered input sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSegment {
    /// Literal prompt text, trimmed; empty fragments are dropped.
    Prompt(String),
    /// The resolved path of a referenced file input; its contents are read
    /// fresh at materialization time.
    File(String),
}

/// Prompt rendering errors
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt references unknown file input '{0}'")]
    UnknownReference(String),
}

/// Render prompt inputs against resolved file paths, in user order.
pub fn render_prompt_inputs(
    prompt_inputs: &[PromptInput],
    name_to_path: &HashMap<String, String>,
) -> Result<Vec<PromptSegment>, PromptError> {
    let mut segments = Vec::new();
    for input in prompt_inputs {
        render_content(&input.content, name_to_path, &mut segments)?;
    }
    Ok(segments)
}

fn render_content(
    content: &str,
    name_to_path: &HashMap<String, String>,
    segments: &mut Vec<PromptSegment>,
) -> Result<(), PromptError> {
    let mut rest = content;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            // Unterminated token: keep the remainder as literal text.
            break;
        };

        push_prompt(segments, &rest[..open]);

        let name = rest[open + 2..open + 2 + close].trim();
        let path = name_to_path
            .get(name)
            .ok_or_else(|| PromptError::UnknownReference(name.to_string()))?;
        segments.push(PromptSegment::File(path.clone()));

        rest = &rest[open + 2 + close + 2..];
    }
    push_prompt(segments, rest);
    Ok(())
}

fn push_prompt(segments: &mut Vec<PromptSegment>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        segments.push(PromptSegment::Prompt(trimmed.to_string()));
    }
}
