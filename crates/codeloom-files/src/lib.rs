//! Local filesystem content store
//!
//! Implements the core [`ContentStore`] contract against the local disk:
//! UTF-8 reads, idempotent directory creation, atomic writes
//! (write-to-temp + rename), and recursive extension-filtered listings.
//! Input files are never mutated; there is no caching layer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use codeloom_core::io::{ContentStore, ContentStoreError};

/// Content store backed by the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalContentStore;

impl LocalContentStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn read_file(&self, path: &str) -> Result<String, ContentStoreError> {
        let path_buf = PathBuf::from(path);
        if !tokio::fs::try_exists(&path_buf).await.unwrap_or(false) {
            return Err(ContentStoreError::InputMissing(path.to_string()));
        }
        let bytes = tokio::fs::read(&path_buf)
            .await
            .map_err(|e| ContentStoreError::Io(format!("{}: {}", path, e)))?;
        String::from_utf8(bytes).map_err(|_| ContentStoreError::InvalidUtf8(path.to_string()))
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), ContentStoreError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ContentStoreError::Io(format!("{}: {}", path, e)))
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), ContentStoreError> {
        let target = PathBuf::from(path);
        let temp = sibling_temp_path(&target);

        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| ContentStoreError::Io(format!("{}: {}", temp.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(ContentStoreError::Io(format!("{}: {}", path, e)));
        }
        tracing::debug!(path = %path, bytes = bytes.len(), "file written");
        Ok(())
    }

    async fn list_files(
        &self,
        root: &str,
        extension: &str,
    ) -> Result<Vec<String>, ContentStoreError> {
        let root = PathBuf::from(root);
        let wanted = extension.trim_start_matches('.').to_ascii_lowercase();

        tokio::task::spawn_blocking(move || walk_tree(&root, &wanted))
            .await
            .map_err(|e| ContentStoreError::Io(e.to_string()))?
    }
}

/// Temp file in the target's directory so the rename stays on one device.
fn sibling_temp_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    target.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

fn walk_tree(root: &Path, wanted: &str) -> Result<Vec<String>, ContentStoreError> {
    if !root.is_dir() {
        return Err(ContentStoreError::InputMissing(
            root.to_string_lossy().to_string(),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| ContentStoreError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase() == wanted)
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_string_lossy().to_string());
        }
    }
    Ok(files)
}
