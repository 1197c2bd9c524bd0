//! Blob fetching: raw document bytes by `(bucket, key)`.
//!
//! This crate provides:
//! - [`BlobStore`]: the object-store interface the fetch stage depends on
//! - [`S3BlobStore`]: authenticated S3 `GetObject` (the default)
//! - [`HttpBlobStore`]: anonymous path-style HTTP gateway (`{endpoint}/{bucket}/{key}`)
//! - [`LocalBlobStore`]: a directory mirror laid out as `{root}/{bucket}/{key}`
//! - [`blob_store_from_config`]: picks one from `[blob]` config

pub mod http;
pub mod local;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use docforest_shared::{BlobConfig, BlobKind, DocForestError, Result};

pub use http::HttpBlobStore;
pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

/// Source of raw document bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch the full content of `key` in `bucket`.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Build the blob store selected by the `[blob]` config section.
pub async fn blob_store_from_config(config: &BlobConfig) -> Result<Arc<dyn BlobStore>> {
    match config.kind {
        BlobKind::S3 => Ok(Arc::new(S3BlobStore::from_config(config).await)),
        BlobKind::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                DocForestError::config("blob.kind = \"http\" requires blob.endpoint")
            })?;
            Ok(Arc::new(HttpBlobStore::new(endpoint, config.timeout_secs)?))
        }
        BlobKind::Local => {
            let root = config.local_root.as_ref().ok_or_else(|| {
                DocForestError::config("blob.kind = \"local\" requires blob.local_root")
            })?;
            Ok(Arc::new(LocalBlobStore::new(root)))
        }
    }
}

/// Reject empty or traversal-prone path parts.
pub(crate) fn check_segments(bucket: &str, key: &str) -> Result<()> {
    if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
        return Err(DocForestError::Fetch(format!("invalid bucket name '{bucket}'")));
    }
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(DocForestError::Fetch(format!("empty key in bucket '{bucket}'")));
    }
    if key.split('/').any(|part| part == "..") {
        return Err(DocForestError::Fetch(format!(
            "key '{key}' in bucket '{bucket}' escapes the bucket"
        )));
    }
    Ok(())
}
