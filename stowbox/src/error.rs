//! Error types for cache protocol operations.

use stowbox_http::{HttpError, StatusCode};
use thiserror::Error;

/// Error type for [`CacheClient`](crate::CacheClient) operations.
///
/// Expected protocol outcomes are not errors: a lookup miss and a reservation
/// held by another writer are reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Required service configuration is missing or blank.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The service answered with an unexpected status.
    #[error("cache service responded with {status}: {body}")]
    Service {
        /// Response status.
        status: StatusCode,
        /// Response body text, for diagnostics.
        body: String,
    },

    /// The request did not produce a response.
    #[error(transparent)]
    Transport(HttpError),

    /// A successful lookup did not carry an archive location.
    #[error("cache entry has no archive location")]
    CacheNotFound,

    /// The downloaded file is not as long as the server announced.
    #[error("incomplete download: expected {expected} bytes, got {actual}")]
    IncompleteDownload {
        /// Value of the `Content-Length` header.
        expected: u64,
        /// Size of the destination file.
        actual: u64,
    },

    /// Cache key rejected before contacting the service.
    #[error("invalid cache key {key:?}: {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Service response body is not the expected JSON document.
    #[error("failed to decode service response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<HttpError> for CacheError {
    fn from(error: HttpError) -> Self {
        match error {
            HttpError::InvalidUrl(error) => CacheError::Url(error),
            HttpError::Io(error) => CacheError::Io(error),
            HttpError::Decode(error) => CacheError::Decode(error),
            error => CacheError::Transport(error),
        }
    }
}
