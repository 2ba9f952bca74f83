use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWrite;
use url::Url;

use crate::body::pipe;
use crate::error::HttpError;
use crate::headers::Headers;

/// Response of an [`HttpClient`](crate::HttpClient) call.
///
/// Status and headers are available immediately; the body is read on demand,
/// either buffered ([`read_body`](Response::read_body), meant for JSON and
/// text payloads) or streamed ([`pipe_to`](Response::pipe_to), meant for blobs).
pub struct Response {
    inner: reqwest::Response,
    headers: Headers,
}

impl Response {
    pub(crate) fn from_reqwest(inner: reqwest::Response) -> Self {
        let headers = Headers::from(inner.headers());
        Self { inner, headers }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status().as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.inner.status().is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Final URL of the response, after redirects.
    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    /// Value of the `Content-Length` header, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|value| value.trim().parse().ok())
    }

    /// Buffers the whole body into a string.
    pub async fn read_body(self) -> Result<String, HttpError> {
        Ok(self.inner.text().await?)
    }

    /// Buffers the whole body.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        Ok(self.inner.bytes().await?)
    }

    /// Buffers the body and decodes it as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = self.inner.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Streams the body into `sink`, returning the number of bytes written.
    pub async fn pipe_to<W>(self, sink: &mut W) -> Result<u64, HttpError>
    where
        W: AsyncWrite + Unpin,
    {
        pipe(self.inner.bytes_stream(), sink).await
    }

    pub fn into_inner(self) -> reqwest::Response {
        self.inner
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status())
            .field("headers", &self.headers)
            .finish()
    }
}
