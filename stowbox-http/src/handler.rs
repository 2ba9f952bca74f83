//! Pluggable request handlers.
//!
//! A [`RequestHandler`] takes part in every request an
//! [`HttpClient`](crate::HttpClient) sends:
//!
//! 1. [`prepare`](RequestHandler::prepare) mutates the outgoing request,
//!    typically to inject credentials. Handlers run in registration order,
//!    after the client default headers and before the per-call headers.
//! 2. Once the response arrives, the client asks each handler in order
//!    whether it [can handle](RequestHandler::can_handle_authentication) an
//!    authentication failure. The first one that answers `true` re-issues the
//!    request through [`handle_authentication`](RequestHandler::handle_authentication)
//!    and its response replaces the original one.
//!
//! Requests with a streamed body ([`RequestBody::Stream`]) cannot be
//! replayed: for them `handle_authentication` is never called, even when a
//! handler answers `true`, and the original response is returned.
//!
//! Only one authentication round happens per request. Handlers re-issue with
//! [`HttpClient::dispatch`](crate::HttpClient::dispatch), which does not
//! consult the handler chain again.

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::Method;
use url::Url;

use crate::body::RequestBody;
use crate::client::HttpClient;
use crate::error::HttpError;
use crate::headers::Headers;
use crate::response::Response;

/// Method, URL and headers of a request about to be sent.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    method: Method,
    url: Url,
    headers: Headers,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url, headers: Headers) -> Self {
        Self {
            method,
            url,
            headers,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn into_parts(self) -> (Method, Url, Headers) {
        (self.method, self.url, self.headers)
    }
}

/// Hook into the request lifecycle of an [`HttpClient`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Mutates the outgoing request before it is sent.
    fn prepare(&self, request: &mut PreparedRequest);

    /// Returns `true` if this handler can resolve the authentication failure
    /// carried by `response`.
    fn can_handle_authentication(&self, _response: &Response) -> bool {
        false
    }

    /// Re-issues `request` with fresh credentials.
    ///
    /// `request` is the prepared request that produced the failing response
    /// and `body` a copy of its payload. Not called for streamed bodies.
    async fn handle_authentication(
        &self,
        client: &HttpClient,
        request: PreparedRequest,
        body: Bytes,
    ) -> Result<Response, HttpError> {
        client.dispatch(request, RequestBody::Full(body)).await
    }
}

/// Sets `Authorization: Basic base64(username:password)`.
#[derive(Clone)]
pub struct BasicCredentialHandler {
    username: String,
    password: String,
}

impl BasicCredentialHandler {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicCredentialHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentialHandler")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl RequestHandler for BasicCredentialHandler {
    fn prepare(&self, request: &mut PreparedRequest) {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        request
            .headers_mut()
            .set("authorization", format!("Basic {encoded}"));
    }
}

/// Sets `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerCredentialHandler {
    token: String,
}

impl BearerCredentialHandler {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerCredentialHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredentialHandler")
            .field("token", &"***")
            .finish()
    }
}

impl RequestHandler for BearerCredentialHandler {
    fn prepare(&self, request: &mut PreparedRequest) {
        request
            .headers_mut()
            .set("authorization", format!("Bearer {}", self.token));
    }
}

/// Sets `Authorization: Basic base64(PAT:<token>)`.
#[derive(Clone)]
pub struct PersonalAccessTokenCredentialHandler {
    token: String,
}

impl PersonalAccessTokenCredentialHandler {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for PersonalAccessTokenCredentialHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalAccessTokenCredentialHandler")
            .field("token", &"***")
            .finish()
    }
}

impl RequestHandler for PersonalAccessTokenCredentialHandler {
    fn prepare(&self, request: &mut PreparedRequest) {
        let encoded = STANDARD.encode(format!("PAT:{}", self.token));
        request
            .headers_mut()
            .set("authorization", format!("Basic {encoded}"));
    }
}
