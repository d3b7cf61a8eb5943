//! HTTP fetcher seam.
//!
//! The lifecycle pipeline talks to the network through the [`Fetcher`]
//! trait so tests can script responses. [`HttpFetcher`] is the real
//! implementation: reqwest with rustls, streaming the response body into a
//! bounded [`ByteStream`] from a pump task so large bodies are never held
//! in memory.

use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tracing::warn;

use crate::stream::ByteStream;
use crate::unit::Headers;
use crate::BoxFuture;

/// Default request timeout, matching common client defaults.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default chunk capacity for response-body streams.
pub const DEFAULT_BODY_STREAM_CAPACITY: usize = 8;

/// Transport-level fetch failures.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// A request for a candidate unit body.
///
/// Conditional validators are attached when updating against a stored
/// unit; a plain registration fetch carries none.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Sent as `If-None-Match`.
    pub if_none_match: Option<String>,
    /// Sent as `If-Modified-Since`.
    pub if_modified_since: Option<String>,
}

impl FetchRequest {
    /// Unconditional request.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            if_none_match: None,
            if_modified_since: None,
        }
    }

    /// Conditional request built from a stored unit's response headers:
    /// `ETag` becomes `If-None-Match`, `Last-Modified` becomes
    /// `If-Modified-Since`, each only when present.
    pub fn conditional(url: impl Into<String>, stored: &Headers) -> Self {
        Self {
            url: url.into(),
            if_none_match: stored.get("etag").map(str::to_string),
            if_modified_since: stored.get("last-modified").map(str::to_string),
        }
    }
}

/// A fetched response: status, headers, and a streaming body.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ByteStream,
}

impl FetchResponse {
    /// 2xx.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Performs HTTP requests for the lifecycle pipeline.
///
/// Uses `BoxFuture` so trait objects (`Arc<dyn Fetcher>`) work across the
/// orchestration layer.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse, FetchError>>;
}

/// Real HTTP fetcher backed by reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
    stream_capacity: usize,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            stream_capacity: DEFAULT_BODY_STREAM_CAPACITY,
        })
    }

    /// Override the body stream's chunk capacity.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse, FetchError>> {
        let client = self.client.clone();
        let capacity = self.stream_capacity;
        Box::pin(async move {
            let mut builder = client.get(&request.url);
            if let Some(value) = &request.if_none_match {
                builder = builder.header("If-None-Match", value);
            }
            if let Some(value) = &request.if_modified_since {
                builder = builder.header("If-Modified-Since", value);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            let mut headers = Headers::new();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    headers.push(name.as_str(), value);
                }
            }

            // Pump the body into a bounded stream; the consumer's pace
            // backpressures the network read.
            let body = ByteStream::bounded(capacity);
            let pump = body.clone();
            let url = request.url.clone();
            tokio::spawn(async move {
                let mut chunks = response.bytes_stream();
                while let Some(next) = chunks.next().await {
                    match next {
                        Ok(chunk) => {
                            if pump.enqueue(chunk).await.is_err() {
                                // Consumer closed the stream early.
                                break;
                            }
                        }
                        Err(error) => {
                            warn!(%url, %error, "response body aborted");
                            break;
                        }
                    }
                }
                pump.close();
            });

            Ok(FetchResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_request_from_stored_headers() {
        let mut stored = Headers::new();
        stored.push("ETag", "\"v3\"");
        stored.push("Last-Modified", "Mon, 02 Feb 2026 10:00:00 GMT");

        let request = FetchRequest::conditional("https://x/u.js", &stored);
        assert_eq!(request.if_none_match.as_deref(), Some("\"v3\""));
        assert_eq!(
            request.if_modified_since.as_deref(),
            Some("Mon, 02 Feb 2026 10:00:00 GMT")
        );

        let bare = FetchRequest::conditional("https://x/u.js", &Headers::new());
        assert_eq!(bare.if_none_match, None);
        assert_eq!(bare.if_modified_since, None);
    }

    #[test]
    fn test_response_status_predicates() {
        let response = |status| FetchResponse {
            status,
            headers: Headers::new(),
            body: ByteStream::new(),
        };
        assert!(response(200).is_ok());
        assert!(response(204).is_ok());
        assert!(!response(304).is_ok());
        assert!(response(304).is_not_modified());
        assert!(!response(404).is_ok());
        assert!(!response(500).is_ok());
    }
}
