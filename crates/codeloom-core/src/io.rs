//! Content IO abstractions
//!
//! Storage-neutral contract for reading step inputs and persisting step
//! outputs. The local-filesystem implementation lives in `codeloom-files`;
//! the engine interacts through this trait only and never mutates inputs.

use async_trait::async_trait;
use thiserror::Error;

/// Content store errors
#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("input file not found: {0}")]
    InputMissing(String),
    #[error("invalid utf-8 in: {0}")]
    InvalidUtf8(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Read input files, create output directories, write result files.
///
/// No caching layer: every read hits the backing store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read a UTF-8 text file. `InputMissing` when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<String, ContentStoreError>;

    /// Create a directory and all missing ancestors. Idempotent.
    async fn ensure_dir(&self, path: &str) -> Result<(), ContentStoreError>;

    /// Write a file atomically, overwriting any previous content.
    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), ContentStoreError>;

    /// Recursively list files under `root` whose extension matches
    /// `extension` (leading dot optional), as paths relative to `root`.
    async fn list_files(&self, root: &str, extension: &str)
        -> Result<Vec<String>, ContentStoreError>;
}

#[async_trait]
impl ContentStore for std::sync::Arc<dyn ContentStore> {
    async fn read_file(&self, path: &str) -> Result<String, ContentStoreError> {
        (**self).read_file(path).await
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), ContentStoreError> {
        (**self).ensure_dir(path).await
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), ContentStoreError> {
        (**self).write_file(path, bytes).await
    }

    async fn list_files(
        &self,
        root: &str,
        extension: &str,
    ) -> Result<Vec<String>, ContentStoreError> {
        (**self).list_files(root, extension).await
    }
}
