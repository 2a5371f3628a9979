//! HTTP client abstraction for testability

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};

use super::types::ProviderError;
use crate::storage::BoxFuture;

/// Default npm registry endpoint.
pub const NPM_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Default PyPI JSON API endpoint.
pub const PYPI_REGISTRY_URL: &str = "https://pypi.org/pypi";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Explicitly constructed client configuration.
///
/// Built once by the caller (usually from the config file) and injected into
/// every provider. There is no process-wide client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub npm_url: String,
    pub pypi_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            npm_url: NPM_REGISTRY_URL.to_string(),
            pypi_url: PYPI_REGISTRY_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
}

/// `depclone/<version>`.
pub fn default_user_agent() -> String {
    format!("depclone/{}", env!("CARGO_PKG_VERSION"))
}

/// A streamed response body.
pub struct PayloadResponse {
    /// Value of the `Content-Length` header, if the server sent one.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, ProviderError>>,
}

/// Trait for async HTTP client operations.
///
/// This abstraction allows providers to be exercised against a canned
/// registry in tests.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs a GET request and returns the whole body.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ProviderError>>;

    /// Performs a GET request and returns the body as a stream of chunks.
    fn get_stream<'a>(&'a self, url: &'a str)
        -> BoxFuture<'a, Result<PayloadResponse, ProviderError>>;
}

/// Real HTTP client implementation using reqwest.
///
/// Plain and TLS transports are both supported; the scheme of each URL
/// selects one.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient from the injected configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl AsyncHttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ProviderError>> {
        Box::pin(async move {
            let response = self.send(url).await?;
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| ProviderError::Http(format!("Failed to read response: {}", e)))
        })
    }

    fn get_stream<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<PayloadResponse, ProviderError>> {
        Box::pin(async move {
            let response = self.send(url).await?;
            let content_length = response.content_length();
            let body = response
                .bytes_stream()
                .map(|chunk| {
                    chunk.map_err(|e| ProviderError::Http(format!("Failed to read response: {}", e)))
                })
                .boxed();
            Ok(PayloadResponse {
                content_length,
                body,
            })
        })
    }
}

#[cfg(test)]
pub mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    /// Mock HTTP client serving canned bodies by URL.
    ///
    /// Unknown URLs answer with HTTP 404. Every request is recorded.
    #[derive(Default)]
    pub struct MockAsyncHttpClient {
        pub responses: HashMap<String, Vec<u8>>,
        pub requests: Mutex<Vec<String>>,
        pub stream_chunk_size: usize,
    }

    impl MockAsyncHttpClient {
        pub fn new() -> Self {
            Self {
                stream_chunk_size: 4,
                ..Default::default()
            }
        }

        pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.responses.insert(url.to_string(), body.into());
            self
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.requests.lock().iter().filter(|u| *u == url).count()
        }

        fn lookup(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
            self.requests.lock().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| ProviderError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
        }
    }

    impl AsyncHttpClient for MockAsyncHttpClient {
        fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ProviderError>> {
            Box::pin(async move { self.lookup(url) })
        }

        fn get_stream<'a>(
            &'a self,
            url: &'a str,
        ) -> BoxFuture<'a, Result<PayloadResponse, ProviderError>> {
            Box::pin(async move {
                let body = self.lookup(url)?;
                let content_length = Some(body.len() as u64);
                let chunks: Vec<Result<Bytes, ProviderError>> = body
                    .chunks(self.stream_chunk_size.max(1))
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                Ok(PayloadResponse {
                    content_length,
                    body: futures::stream::iter(chunks).boxed(),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_mock_client_success() {
        let mock = MockAsyncHttpClient::new().with("http://example.com/a", vec![1, 2, 3]);
        assert_eq!(mock.get("http://example.com/a").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(mock.request_count("http://example.com/a"), 1);
    }

    #[tokio::test]
    async fn test_mock_client_unknown_url_is_404() {
        let mock = MockAsyncHttpClient::new();
        let err = mock.get("http://example.com/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_stream_reassembles_body() {
        let mock = MockAsyncHttpClient::new().with("u", b"hello world".to_vec());
        let response = mock.get_stream("u").await.unwrap();
        assert_eq!(response.content_length, Some(11));

        let chunks: Vec<Bytes> = response
            .body
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"hello world".to_vec());
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.npm_url, NPM_REGISTRY_URL);
        assert_eq!(config.pypi_url, PYPI_REGISTRY_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("depclone/"));
    }

    #[test]
    fn test_reqwest_client_builds() {
        assert!(ReqwestClient::new(&ClientConfig::default()).is_ok());
    }
}
