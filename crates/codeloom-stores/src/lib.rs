//! Configuration document store
//!
//! Single-document JSON persistence for the two configuration documents:
//! `app-config.json` (standalone workflows) and
//! `multi-file-stream-config.json` (tasks and templates). Last writer
//! wins; saves are serialized through a per-document lock while loads are
//! lock-free snapshots.
//!
//! Before every save the store strips transient runtime fields from steps
//! and reverts `running` group status to `idle`, so a process restart
//! never resurrects phantom executions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Which configuration document an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// Standalone workflows (`app-config.json`).
    App,
    /// Tasks and templates (`multi-file-stream-config.json`).
    MultiStream,
}

impl ConfigKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::App => "app-config.json",
            Self::MultiStream => "multi-file-stream-config.json",
        }
    }
}

/// Configuration store errors
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("configuration not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Metadata about a stored document.
#[derive(Debug, Clone)]
pub struct ConfigInfo {
    pub path: String,
    pub exists: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// File-backed store for the configuration documents.
pub struct ConfigStore {
    root: PathBuf,
    app_lock: Mutex<()>,
    multi_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a store rooted at a `configs/` directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            app_lock: Mutex::new(()),
            multi_lock: Mutex::new(()),
        }
    }

    fn path_of(&self, kind: ConfigKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    fn lock_of(&self, kind: ConfigKind) -> &Mutex<()> {
        match kind {
            ConfigKind::App => &self.app_lock,
            ConfigKind::MultiStream => &self.multi_lock,
        }
    }

    /// Load a document. Absent files are an explicit `NotFound`, never an
    /// empty default.
    pub async fn load(&self, kind: ConfigKind) -> Result<Value, ConfigStoreError> {
        let path = self.path_of(kind);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ConfigStoreError::NotFound(
                kind.file_name().to_string(),
            ));
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigStoreError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| ConfigStoreError::Serialization(e.to_string()))
    }

    /// Save a document atomically, sanitizing transient fields and
    /// stamping `lastUpdated` (RFC3339) and `version`. Returns the
    /// document as written.
    pub async fn save(
        &self,
        kind: ConfigKind,
        mut document: Value,
    ) -> Result<Value, ConfigStoreError> {
        sanitize_document(&mut document);
        if let Value::Object(map) = &mut document {
            map.insert(
                "lastUpdated".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            map.insert(
                "version".to_string(),
                Value::String(env!("CARGO_PKG_VERSION").to_string()),
            );
        }

        let _guard = self.lock_of(kind).lock().await;
        let path = self.path_of(kind);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigStoreError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| ConfigStoreError::Serialization(e.to_string()))?;
        let temp = temp_path(&path);
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| ConfigStoreError::Io(format!("{}: {}", temp.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(ConfigStoreError::Io(format!("{}: {}", path.display(), e)));
        }

        tracing::info!(
            document = kind.file_name(),
            bytes = bytes.len(),
            "configuration saved"
        );
        Ok(document)
    }

    /// Metadata for a document, whether or not it exists.
    pub async fn info(&self, kind: ConfigKind) -> Result<ConfigInfo, ConfigStoreError> {
        let path = self.path_of(kind);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(ConfigInfo {
                path: path.to_string_lossy().to_string(),
                exists: true,
                size: meta.len(),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            }),
            Err(_) => Ok(ConfigInfo {
                path: path.to_string_lossy().to_string(),
                exists: false,
                size: 0,
                last_modified: None,
            }),
        }
    }

    /// Remove a document. Deleting an absent document is `NotFound`.
    pub async fn delete(&self, kind: ConfigKind) -> Result<(), ConfigStoreError> {
        let _guard = self.lock_of(kind).lock().await;
        let path = self.path_of(kind);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ConfigStoreError::NotFound(kind.file_name().to_string()));
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ConfigStoreError::Io(format!("{}: {}", path.display(), e)))
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string());
    target.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

/// Strip transient runtime state everywhere steps can appear:
/// `workflowGroups[*].template.workflows[*].steps[*]`,
/// `workflowGroupTemplates[*].workflows[*].steps[*]` and
/// `workflows[*].steps[*]`. Group status `running` reverts to `idle`.
fn sanitize_document(document: &mut Value) {
    let Value::Object(map) = document else {
        return;
    };

    if let Some(Value::Array(groups)) = map.get_mut("workflowGroups") {
        for group in groups {
            if let Value::Object(group_map) = group {
                if group_map.get("status").and_then(Value::as_str) == Some("running") {
                    group_map.insert("status".to_string(), Value::String("idle".to_string()));
                }
                if let Some(template) = group_map.get_mut("template") {
                    sanitize_workflow_container(template);
                }
            }
        }
    }

    if let Some(Value::Array(templates)) = map.get_mut("workflowGroupTemplates") {
        for template in templates {
            sanitize_workflow_container(template);
        }
    }

    sanitize_workflow_list(map.get_mut("workflows"));
}

fn sanitize_workflow_container(container: &mut Value) {
    if let Value::Object(map) = container {
        sanitize_workflow_list(map.get_mut("workflows"));
    }
}

fn sanitize_workflow_list(workflows: Option<&mut Value>) {
    let Some(Value::Array(workflows)) = workflows else {
        return;
    };
    for workflow in workflows {
        let Value::Object(workflow_map) = workflow else {
            continue;
        };
        let Some(Value::Array(steps)) = workflow_map.get_mut("steps") else {
            continue;
        };
        for step in steps {
            if let Value::Object(step_map) = step {
                step_map.remove("result");
                if step_map.contains_key("status") {
                    step_map.insert("status".to_string(), Value::String("pending".to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("configs"))
    }

    #[test]
    fn test_load_missing_document_is_not_found() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let result = store(&dir).load(ConfigKind::App).await;
            assert!(matches!(result, Err(ConfigStoreError::NotFound(_))));
        });
    }

    #[test]
    fn test_save_stamps_timestamp_and_version() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            let saved = s
                .save(ConfigKind::App, json!({"workflows": []}))
                .await
                .expect("save");
            assert!(saved["lastUpdated"].is_string());
            assert_eq!(saved["version"], env!("CARGO_PKG_VERSION"));

            // Round-trips as ISO-8601.
            let loaded = s.load(ConfigKind::App).await.expect("load");
            let stamp = loaded["lastUpdated"].as_str().unwrap();
            assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        });
    }

    #[test]
    fn test_save_strips_step_runtime_state_everywhere() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            let step = json!({
                "id": "s1",
                "order": 0,
                "status": "success",
                "result": {"success": true, "message": "done"}
            });
            let document = json!({
                "workflowGroups": [{
                    "id": "g1",
                    "status": "running",
                    "template": {"workflows": [{"id": "w1", "steps": [step]}]}
                }],
                "workflowGroupTemplates": [{
                    "id": "t1",
                    "workflows": [{"id": "w2", "steps": [step]}]
                }],
                "workflows": [{"id": "w3", "steps": [step]}]
            });

            let saved = s
                .save(ConfigKind::MultiStream, document)
                .await
                .expect("save");

            let group_step = &saved["workflowGroups"][0]["template"]["workflows"][0]["steps"][0];
            let template_step = &saved["workflowGroupTemplates"][0]["workflows"][0]["steps"][0];
            let workflow_step = &saved["workflows"][0]["steps"][0];
            for step in [group_step, template_step, workflow_step] {
                assert_eq!(step["status"], "pending");
                assert!(step.get("result").is_none());
            }
            assert_eq!(saved["workflowGroups"][0]["status"], "idle");
        });
    }

    #[test]
    fn test_save_load_save_is_pure_for_steps() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            let document = json!({
                "workflows": [{"id": "w1", "steps": [
                    {"id": "s1", "status": "error", "result": {"success": false}}
                ]}]
            });
            s.save(ConfigKind::App, document).await.expect("save");
            let loaded = s.load(ConfigKind::App).await.expect("load");
            let saved_again = s.save(ConfigKind::App, loaded).await.expect("save again");

            let step = &saved_again["workflows"][0]["steps"][0];
            assert_eq!(step["status"], "pending");
            assert!(step.get("result").is_none());
        });
    }

    #[test]
    fn test_terminal_group_status_is_preserved() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            let document = json!({
                "workflowGroups": [
                    {"id": "g1", "status": "completed", "template": {"workflows": []}},
                    {"id": "g2", "status": "failed", "template": {"workflows": []}}
                ]
            });
            let saved = s.save(ConfigKind::MultiStream, document).await.expect("save");
            assert_eq!(saved["workflowGroups"][0]["status"], "completed");
            assert_eq!(saved["workflowGroups"][1]["status"], "failed");
        });
    }

    #[test]
    fn test_info_reports_existence_and_size() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            let absent = s.info(ConfigKind::App).await.expect("info");
            assert!(!absent.exists);
            assert_eq!(absent.size, 0);

            s.save(ConfigKind::App, json!({"workflows": []}))
                .await
                .expect("save");
            let present = s.info(ConfigKind::App).await.expect("info");
            assert!(present.exists);
            assert!(present.size > 0);
            assert!(present.last_modified.is_some());
        });
    }

    #[test]
    fn test_delete_removes_document() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            assert!(matches!(
                s.delete(ConfigKind::App).await,
                Err(ConfigStoreError::NotFound(_))
            ));

            s.save(ConfigKind::App, json!({})).await.expect("save");
            s.delete(ConfigKind::App).await.expect("delete");
            assert!(matches!(
                s.load(ConfigKind::App).await,
                Err(ConfigStoreError::NotFound(_))
            ));
        });
    }

    #[test]
    fn test_documents_are_independent() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let s = store(&dir);

            s.save(ConfigKind::App, json!({"kind": "app"}))
                .await
                .expect("save");
            s.save(ConfigKind::MultiStream, json!({"kind": "multi"}))
                .await
                .expect("save");

            assert_eq!(s.load(ConfigKind::App).await.unwrap()["kind"], "app");
            assert_eq!(
                s.load(ConfigKind::MultiStream).await.unwrap()["kind"],
                "multi"
            );
        });
    }
}
