//! Template materialization
//!
//! Expands one template across a user-selected set of discovered source
//! files into fully-specified tasks, rewriting per-step path and name
//! fields deterministically. Pure: no I/O, no shared state; re-running
//! with the same inputs yields identical tasks modulo freshly-minted ids
//! and timestamps.

use chrono::Utc;

use crate::types::{Task, TaskStatus, WorkflowTemplate};

/// File inputs bearing this name are shared across tasks and are never
/// rewritten ("API document" in the original tooling's locale).
pub const SHARED_INPUT_NAME: &str = "接口文档";

/// File inputs bearing this name consume the selection's raw source file
/// when that selection is a `.jsp`.
const JSP_INPUT_NAME: &str = "jsp";

/// One selected source file: a root plus a path relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub source_path: String,
    /// Relative file identifier; may include subdirectories, with either
    /// separator style.
    pub file: String,
}

impl Selection {
    pub fn new(source_path: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            file: file.into(),
        }
    }
}

/// Naming options applied to every materialized task.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    pub name_prefix: String,
    /// Task name pattern; `{fileName}` is replaced by the capitalized base
    /// name. Falls back to `<prefix>-<CapitalizedBase>`.
    pub name_pattern: Option<String>,
    /// Description pattern; `{fileName}` and `{sourcePath}` are substituted.
    pub description: Option<String>,
}

/// Expand `template` over `selections`, producing one task per selection.
pub fn materialize(
    template: &WorkflowTemplate,
    selections: &[Selection],
    options: &MaterializeOptions,
) -> Vec<Task> {
    selections
        .iter()
        .map(|selection| materialize_one(template, selection, options))
        .collect()
}

fn materialize_one(
    template: &WorkflowTemplate,
    selection: &Selection,
    options: &MaterializeOptions,
) -> Task {
    let full_file_path = selection.file.as_str();
    let file_name = base_name(full_file_path);
    let (base, _) = split_extension(file_name);
    let capitalized = capitalize_first(base);
    let rel_prefix = dir_portion(full_file_path);

    let mut rewritten = template.clone();
    for workflow in &mut rewritten.workflows {
        for step in &mut workflow.steps {
            for input in &mut step.config.file_inputs {
                if input.name == SHARED_INPUT_NAME {
                    continue;
                }

                let directory = dir_portion(&input.path).to_string();
                let original_name = base_name(&input.path).to_string();
                let (_, original_ext) = split_extension(&original_name);

                // .jsp inputs consume the selection's raw file under the
                // source root, keeping its exact casing.
                if input.name == JSP_INPUT_NAME || original_ext.eq_ignore_ascii_case(".jsp") {
                    input.path = join_path(&selection.source_path, full_file_path);
                    continue;
                }

                let new_file_name = format!("{}{}", capitalized, original_ext);
                let mut final_dir = directory;
                if !rel_prefix.is_empty() && !final_dir.contains(rel_prefix) {
                    final_dir = join_path(&final_dir, rel_prefix);
                }
                input.path = join_path(&final_dir, &new_file_name);
            }

            let (_, output_ext) = split_extension(&step.config.output_file_name);
            step.config.output_file_name =
                format!("{}{}{}", options.name_prefix, capitalized, output_ext);
            if !rel_prefix.is_empty() && !step.config.output_folder.contains(rel_prefix) {
                step.config.output_folder = join_path(&step.config.output_folder, rel_prefix);
            }
        }
    }

    let name = task_name(options, &capitalized);
    let description = options
        .description
        .clone()
        .unwrap_or_default()
        .replace("{fileName}", file_name)
        .replace("{sourcePath}", &selection.source_path);

    let now = Utc::now();
    Task {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        description,
        template: rewritten,
        status: TaskStatus::Idle,
        execution_results: None,
        created_at: Some(now),
        updated_at: Some(now),
    }
}

fn task_name(options: &MaterializeOptions, capitalized: &str) -> String {
    if let Some(pattern) = options.name_pattern.as_deref().filter(|p| !p.is_empty()) {
        return pattern.replace("{fileName}", capitalized);
    }
    let prefix = if options.name_prefix.is_empty() {
        "task"
    } else {
        options.name_prefix.as_str()
    };
    if prefix.ends_with('-') {
        format!("{}{}", prefix, capitalized)
    } else {
        format!("{}-{}", prefix, capitalized)
    }
}

/// Join two path fragments, keeping the separator style of `base` so a
/// single rewritten output never mixes styles.
pub fn join_path(base: &str, rel: &str) -> String {
    if base.is_empty() {
        return rel.to_string();
    }
    if rel.is_empty() {
        return base.to_string();
    }
    let sep = if base.contains('\\') { '\\' } else { '/' };
    format!(
        "{}{}{}",
        base.trim_end_matches(['/', '\\']),
        sep,
        rel.trim_start_matches(['/', '\\'])
    )
}

/// Last path segment; `\` and `/` both separate.
fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Directory portion, empty for flat paths.
fn dir_portion(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Split a file name into (base, dot-extension); hidden files and
/// extension-less names keep everything in the base.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    }
}

/// Upper-case the first character, rest unchanged.
fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
