//! Path-style HTTP object-store client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use docforest_shared::{DocForestError, Result};

use crate::{BlobStore, check_segments};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("docforest/", env!("CARGO_PKG_VERSION"));

/// Fetches `GET {endpoint}/{bucket}/{key}` from an anonymous gateway or a
/// public bucket. Requests are unsigned; private buckets need
/// [`S3BlobStore`](crate::S3BlobStore).
pub struct HttpBlobStore {
    endpoint: Url,
    client: Client,
}

impl HttpBlobStore {
    /// Create a store for `endpoint` with a per-request timeout.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| DocForestError::config(format!("invalid blob endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(DocForestError::config(format!(
                "blob endpoint '{endpoint}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DocForestError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { endpoint, client })
    }

    /// URL of one object; bucket and key segments are percent-encoded individually.
    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                DocForestError::config(format!("blob endpoint '{}' cannot carry a path", self.endpoint))
            })?;
            segments.pop_if_empty().push(bucket);
            for part in key.trim_start_matches('/').split('/') {
                segments.push(part);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self), fields(store = "http"))]
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        check_segments(bucket, key)?;
        let url = self.object_url(bucket, key)?;
        debug!(%url, "fetching object");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DocForestError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocForestError::Fetch(format!("{url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DocForestError::Fetch(format!("{url}: body read failed: {e}")))?;

        debug!(%url, bytes = body.len(), "object fetched");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_encodes_segments() {
        let store = HttpBlobStore::new("https://s3.example.com/", 5).unwrap();
        let url = store.object_url("docs", "dir one/file#1.xml").unwrap();
        assert_eq!(
            url.as_str(),
            "https://s3.example.com/docs/dir%20one/file%231.xml"
        );
    }

    #[test]
    fn object_url_keeps_endpoint_prefix() {
        let store = HttpBlobStore::new("http://gateway.local/storage", 5).unwrap();
        let url = store.object_url("b", "/k.xml").unwrap();
        assert_eq!(url.as_str(), "http://gateway.local/storage/b/k.xml");
    }

    #[test]
    fn rejects_unusable_endpoint() {
        assert!(HttpBlobStore::new("not a url", 5).is_err());
        assert!(HttpBlobStore::new("mailto:ops@example.com", 5).is_err());
    }

    #[tokio::test]
    async fn fetch_from_mock_server() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/docs/a/b.xml"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<a>hi</a>"))
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&server.uri(), 5).unwrap();
        let bytes = store.fetch("docs", "a/b.xml").await.unwrap();
        assert_eq!(bytes, b"<a>hi</a>");
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::path("/docs/missing.xml"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&server.uri(), 5).unwrap();
        let err = store.fetch("docs", "missing.xml").await.unwrap_err();
        assert!(matches!(err, DocForestError::Fetch(_)));
        assert!(err.to_string().contains("404"));
    }
}
