//! Authenticated S3 client.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::error::DisplayErrorContext;
use tracing::{debug, instrument};

use docforest_shared::{BlobConfig, DocForestError, Result};

use crate::{BlobStore, check_segments};

/// Fetches objects with `GetObject`. Requests are signed with credentials from
/// the standard AWS provider chain (environment, shared profile, instance role).
pub struct S3BlobStore {
    client: Client,
}

impl S3BlobStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for `[blob]`: its region, timeout and, when set, an
    /// S3-compatible endpoint addressed path-style.
    pub async fn from_config(config: &BlobConfig) -> Self {
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(timeouts)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(store = "s3"))]
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        check_segments(bucket, key)?;

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    DocForestError::Fetch(format!("s3://{bucket}/{key}: no such key"))
                } else {
                    DocForestError::Fetch(format!("s3://{bucket}/{key}: {}", DisplayErrorContext(&e)))
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| DocForestError::Fetch(format!("s3://{bucket}/{key}: body read failed: {e}")))?;

        let bytes = body.into_bytes().to_vec();
        debug!(bytes = bytes.len(), "object fetched");
        Ok(bytes)
    }
}
