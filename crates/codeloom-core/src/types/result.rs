//! Step execution results

use serde::{Deserialize, Serialize};

/// Output descriptor published by a completed step.
///
/// `path` is the canonical handle downstream steps consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// The runtime outcome of a step. Lives in memory during a run and in the
/// live task view; never written to the configuration documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StepResultData>,
}

impl StepResult {
    /// A successful result carrying the persisted output descriptor.
    pub fn completed(
        path: impl Into<String>,
        content: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let size = content.len() as u64;
        Self {
            success: true,
            message: message.into(),
            data: Some(StepResultData {
                path: Some(path.into()),
                content: Some(content),
                size: Some(size),
            }),
        }
    }

    /// A failed result; the message is the user-visible cause.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// The output path, when this result is a consumable success.
    pub fn output_path(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.path.as_deref())
            .filter(|p| !p.is_empty())
    }
}
