//! Error types for HTTP client operations.

use thiserror::Error;

/// Error type for [`HttpClient`](crate::HttpClient) operations.
///
/// A non-2xx status is never an error at this layer: callers inspect
/// [`Response::status`](crate::Response::status) themselves.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection-level failure.
    ///
    /// Connection refused, DNS failure, timeouts and redirect policy
    /// violations all end up here.
    #[error(transparent)]
    Transport(#[from] reqwest_middleware::Error),

    /// Header name or value that cannot be put on the wire.
    #[error("invalid header {name:?}")]
    InvalidHeader {
        /// Offending header name.
        name: String,
    },

    /// Request URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Reading a request body source or writing a response body sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Response body is not the expected JSON document.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        HttpError::Transport(reqwest_middleware::Error::Reqwest(error))
    }
}

impl HttpError {
    /// Returns `true` for failures that happened before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, HttpError::Transport(_))
    }
}
