//! Directory-backed object store, for mirrored corpora and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use docforest_shared::{DocForestError, Result};

use crate::{BlobStore, check_segments};

/// Reads `{root}/{bucket}/{key}` from the local filesystem.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for part in key.trim_start_matches('/').split('/') {
            path.push(part);
        }
        path
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), fields(store = "local"))]
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        check_segments(bucket, key)?;
        let path = self.object_path(bucket, key);

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            DocForestError::Fetch(format!("{}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "object read");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_object_under_bucket_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/nested")).unwrap();
        std::fs::write(dir.path().join("docs/nested/a.xml"), "<a/>").unwrap();

        let store = LocalBlobStore::new(dir.path());
        let bytes = store.fetch("docs", "nested/a.xml").await.unwrap();
        assert_eq!(bytes, b"<a/>");
    }

    #[tokio::test]
    async fn missing_object_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let err = store.fetch("docs", "nope.xml").await.unwrap_err();
        assert!(matches!(err, DocForestError::Fetch(_)));
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.fetch("docs", "../../secret").await.is_err());
    }
}
