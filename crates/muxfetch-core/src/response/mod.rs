//! Response payloads and the error values delivered to subscribers.
//!
//! Transport failures are never thrown across the multiplexer boundary: they
//! travel through the same callback as a success, as `Err(FetchError)`.

mod classify;
mod headers;

use std::sync::Arc;

pub use classify::{classify_curl_error, classify_http_status};
pub use headers::{parse_headers, ResponseHeaders};

/// A completed fetch. Cloning shares the payload allocation, so every
/// subscriber of one fan-out sees the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u32,
    pub data: Arc<[u8]>,
    /// `ETag` without surrounding quotes.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires: Option<String>,
    /// `Cache-Control: no-cache` or `must-revalidate` was present.
    pub must_revalidate: bool,
}

impl Response {
    /// A 200 response carrying `data` and no validators.
    pub fn ok(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            status: 200,
            data: data.into(),
            etag: None,
            last_modified: None,
            expires: None,
            must_revalidate: false,
        }
    }

    /// True for HTTP 304; `data` is empty in that case.
    pub fn not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Failed fetch, delivered to every subscriber of the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("resource not found (HTTP 404)")]
    NotFound,
    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<String> },
    #[error("server error (HTTP {0})")]
    Server(u32),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outcome of one transport operation.
pub type FetchResult = Result<Response, FetchError>;
