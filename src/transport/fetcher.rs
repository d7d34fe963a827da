use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors for a single GET.
///
/// These never escape [`Transport::fetch`]; a failed URL simply contributes
/// no document to the batch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured per-request timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body was not valid JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Bounded-concurrency JSON fetcher.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    concurrency: usize,
    request_timeout: Duration,
}

impl Transport {
    pub const DEFAULT_CONCURRENCY: usize = 10;
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Wrap an existing client. A `concurrency` of 0 is treated as 1.
    pub fn new(client: reqwest::Client, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build a client with the given user agent.
    pub fn build(user_agent: &str, concurrency: usize) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self::new(client, concurrency))
    }

    /// Same transport with a different per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// GET every URL with at most `concurrency` requests in flight.
    ///
    /// Returns the documents that were fetched and parsed successfully, in
    /// request order. Failed URLs are logged and skipped, so the result may be
    /// shorter than `urls` and positions must not be matched against it.
    /// Returns once every request has settled.
    pub async fn fetch(&self, urls: &[String]) -> Vec<Value> {
        if urls.is_empty() {
            return Vec::new();
        }

        let results: Vec<Option<Value>> = stream::iter(urls.iter())
            .map(|url| async move { self.fetch_one(url).await })
            .buffered(self.concurrency)
            .boxed()
            .collect()
            .await;

        let documents: Vec<Value> = results.into_iter().flatten().collect();
        if documents.len() < urls.len() {
            tracing::debug!(
                requested = urls.len(),
                received = documents.len(),
                "Batch fetch completed with failures"
            );
        }
        documents
    }

    /// GET a single URL. `None` if the request failed for any reason.
    pub async fn fetch_one(&self, url: &str) -> Option<Value> {
        match self.get_json(url).await {
            Ok(document) => Some(document),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Fetch failed");
                None
            }
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        let response = tokio::time::timeout(self.request_timeout, self.client.get(url).send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Network)?;

        if !response.status().is_success() {
            return Err(TransportError::HttpStatus(response.status().as_u16()));
        }

        let bytes = tokio::time::timeout(
            self.request_timeout,
            read_limited_bytes(response, MAX_DOCUMENT_SIZE),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(TransportError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(TransportError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> Transport {
        Transport::new(reqwest::Client::new(), 4)
    }

    #[tokio::test]
    async fn test_fetch_one_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "num": 5 })))
            .mount(&mock_server)
            .await;

        let doc = transport()
            .fetch_one(&format!("{}/info.0.json", mock_server.uri()))
            .await;
        assert_eq!(doc, Some(json!({ "num": 5 })));
    }

    #[tokio::test]
    async fn test_fetch_one_404_is_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let doc = transport()
            .fetch_one(&format!("{}/missing", mock_server.uri()))
            .await;
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_fetch_one_invalid_json_is_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&mock_server)
            .await;

        let result = transport()
            .get_json(&format!("{}/bad", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(TransportError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_one_connection_refused_is_none() {
        // Port 9 (discard) is not served by anything in the test environment
        let doc = transport().fetch_one("http://127.0.0.1:9/").await;
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_fetch_one_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "num": 1 }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let result = transport()
            .with_request_timeout(Duration::from_millis(50))
            .get_json(&format!("{}/slow", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_batch_skips_failures_and_keeps_request_order() {
        let mock_server = MockServer::start().await;
        for i in [1, 2, 4] {
            Mock::given(method("GET"))
                .and(path(format!("/{i}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({ "num": i }))
                        // Later URLs answer first
                        .set_delay(Duration::from_millis(60 - i * 10)),
                )
                .mount(&mock_server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/3"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let urls: Vec<String> = (1..=4)
            .map(|i| format!("{}/{}", mock_server.uri(), i))
            .collect();
        let docs = transport().fetch(&urls).await;

        let nums: Vec<i64> = docs.iter().filter_map(|d| d["num"].as_i64()).collect();
        assert_eq!(nums, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_fetch_empty_batch() {
        assert!(transport().fetch(&[]).await.is_empty());
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let transport = Transport::new(reqwest::Client::new(), 0);
        assert_eq!(transport.concurrency(), 1);
    }
}
