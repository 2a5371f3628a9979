//! Registry metadata document fetching with an in-walk cache.
//!
//! Version resolution and the manifest/payload fetch both need the same
//! registry document. The document is requested once per walk and kept in a
//! `moka::future::Cache`, which is dropped together with the provider when
//! the walk ends; nothing is cached between runs.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;
use serde_json::Value;
use tracing::debug;

use super::http::AsyncHttpClient;
use super::types::{ProviderError, ProviderResult};

/// Upper bound on cached documents per walk.
const MAX_DOCUMENTS: u64 = 1024;

/// Documents are only useful for the lifetime of one walk.
const DOCUMENT_TTL: Duration = Duration::from_secs(10 * 60);

/// Fetches and caches registry JSON documents by URL.
pub(crate) struct DocumentCache {
    client: Arc<dyn AsyncHttpClient>,
    cache: MokaCache<String, Arc<Value>>,
}

impl DocumentCache {
    pub(crate) fn new(client: Arc<dyn AsyncHttpClient>) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(MAX_DOCUMENTS)
            .time_to_live(DOCUMENT_TTL)
            .build();
        Self { client, cache }
    }

    /// Fetch the JSON document at `url`, describing `display_name` in errors.
    ///
    /// HTTP 404 maps to [`ProviderError::NotFound`].
    pub(crate) async fn fetch(&self, url: &str, display_name: &str) -> ProviderResult<Arc<Value>> {
        if let Some(document) = self.cache.get(url).await {
            debug!(url, "Registry document cache hit");
            return Ok(document);
        }

        let body = self.client.get(url).await.map_err(|e| {
            if e.is_not_found() {
                ProviderError::NotFound {
                    name: display_name.to_string(),
                    reason: "module not found in registry".to_string(),
                }
            } else {
                e
            }
        })?;

        let document: Value =
            serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidDocument {
                name: display_name.to_string(),
                reason: e.to_string(),
            })?;
        if !document.is_object() {
            return Err(ProviderError::InvalidDocument {
                name: display_name.to_string(),
                reason: "expected a JSON object".to_string(),
            });
        }

        let document = Arc::new(document);
        self.cache.insert(url.to_string(), Arc::clone(&document)).await;
        debug!(url, "Registry document fetched");
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::http::tests::MockAsyncHttpClient;

    #[tokio::test]
    async fn test_fetch_caches_document() {
        let mock = Arc::new(MockAsyncHttpClient::new().with("r/a", br#"{"name":"a"}"#.to_vec()));
        let documents = DocumentCache::new(mock.clone());

        let first = documents.fetch("r/a", "a").await.unwrap();
        let second = documents.fetch("r/a", "a").await.unwrap();

        assert_eq!(first["name"], "a");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mock.request_count("r/a"), 1);
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let documents = DocumentCache::new(Arc::new(MockAsyncHttpClient::new()));
        let err = documents.fetch("r/nope", "nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { ref name, .. } if name == "nope"));
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let mock = MockAsyncHttpClient::new()
            .with("r/bad", b"not json".to_vec())
            .with("r/array", b"[1]".to_vec());
        let documents = DocumentCache::new(Arc::new(mock));

        assert!(matches!(
            documents.fetch("r/bad", "bad").await,
            Err(ProviderError::InvalidDocument { .. })
        ));
        assert!(matches!(
            documents.fetch("r/array", "array").await,
            Err(ProviderError::InvalidDocument { .. })
        ));
    }
}
