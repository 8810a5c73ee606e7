//! Classify HTTP status codes and curl errors into delivered results.

use std::sync::Arc;

use super::{FetchError, FetchResult, Response, ResponseHeaders};

/// Turn a finished HTTP exchange into the value fanned out to subscribers.
///
/// 2xx and 304 are successes; everything else becomes a `FetchError`.
pub fn classify_http_status(status: u32, headers: ResponseHeaders, body: Vec<u8>) -> FetchResult {
    match status {
        200..=299 | 304 => {
            let data: Arc<[u8]> = if status == 304 {
                Arc::from(Vec::new())
            } else {
                Arc::from(body)
            };
            Ok(Response {
                status,
                data,
                etag: headers.etag,
                last_modified: headers.last_modified,
                expires: headers.expires,
                must_revalidate: headers.must_revalidate,
            })
        }
        404 => Err(FetchError::NotFound),
        429 => Err(FetchError::RateLimited {
            retry_after: headers.retry_after,
        }),
        500..=599 => Err(FetchError::Server(status)),
        _ => Err(FetchError::Http(status)),
    }
}

/// Classify a curl error reported for a whole transfer.
pub fn classify_curl_error(e: &curl::Error) -> FetchError {
    if e.is_operation_timedout() {
        return FetchError::Timeout(e.to_string());
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_ssl_connect_error()
    {
        return FetchError::Connection(e.to_string());
    }
    FetchError::Transport(e.to_string())
}
