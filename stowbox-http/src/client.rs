//! The HTTP client.
//!
//! # Header precedence
//!
//! Headers of an outgoing request are assembled in three layers, later layers
//! winning on conflicting names:
//!
//! 1. client default headers ([`HttpClientConfig::headers`] and
//!    [`HttpClientBuilder::header`]),
//! 2. headers set by each [`RequestHandler::prepare`], in registration order,
//! 3. the per-call headers passed to [`HttpClient::request`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use reqwest::redirect;
use reqwest_middleware::ClientWithMiddleware;
use tracing::debug;
use url::Url;

use crate::body::RequestBody;
use crate::config::{HttpClientConfig, RedirectPolicy};
use crate::error::HttpError;
use crate::handler::{PreparedRequest, RequestHandler};
use crate::headers::Headers;
use crate::response::Response;
use crate::retry::RetryMiddleware;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// HTTP client with a request handler chain.
///
/// Wraps one connection pool; clones share it. The pool is released when the
/// last clone is dropped or [disposed](HttpClient::dispose).
#[derive(Clone)]
pub struct HttpClient {
    inner: ClientWithMiddleware,
    default_headers: Headers,
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl HttpClient {
    /// Creates a client without handlers.
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Sends one request.
    ///
    /// Runs every handler over the request, sends it and gives the handler
    /// chain one chance to resolve an authentication failure. Any status code
    /// is a successful result; only transport failures are errors.
    pub async fn request(
        &self,
        method: Method,
        url: impl AsRef<str>,
        body: impl Into<RequestBody>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        let url = Url::parse(url.as_ref())?;
        let body = body.into();

        let mut request = PreparedRequest::new(method, url, self.default_headers.clone());
        for handler in &self.handlers {
            handler.prepare(&mut request);
        }
        request.headers_mut().extend_from(headers);

        let snapshot = body.snapshot();
        let response = self.dispatch(request.clone(), body).await?;
        self.authenticate(request, snapshot, response).await
    }

    /// Sends a prepared request as-is.
    ///
    /// Neither handlers nor the authentication round run here. Handlers use
    /// this to re-issue a request from
    /// [`handle_authentication`](RequestHandler::handle_authentication).
    pub async fn dispatch(
        &self,
        request: PreparedRequest,
        body: RequestBody,
    ) -> Result<Response, HttpError> {
        let (method, url, headers) = request.into_parts();
        debug!(
            %method,
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "sending request"
        );

        let builder = self
            .inner
            .request(method, url)
            .headers(headers.to_header_map()?);
        let builder = match body {
            RequestBody::Empty => builder,
            body => builder.body(body.into_reqwest()),
        };

        let response = builder.send().await?;
        Ok(Response::from_reqwest(response))
    }

    async fn authenticate(
        &self,
        request: PreparedRequest,
        snapshot: Option<Bytes>,
        response: Response,
    ) -> Result<Response, HttpError> {
        let Some(handler) = self
            .handlers
            .iter()
            .find(|handler| handler.can_handle_authentication(&response))
        else {
            return Ok(response);
        };

        let Some(body) = snapshot else {
            debug!(
                status = response.status_code(),
                "streamed body cannot be replayed, skipping authentication retry"
            );
            return Ok(response);
        };

        debug!(
            status = response.status_code(),
            "re-issuing request through authentication handler"
        );
        drop(response);
        handler.handle_authentication(self, request, body).await
    }

    pub async fn get(&self, url: impl AsRef<str>, headers: &Headers) -> Result<Response, HttpError> {
        self.request(Method::GET, url, RequestBody::Empty, headers)
            .await
    }

    pub async fn head(
        &self,
        url: impl AsRef<str>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        self.request(Method::HEAD, url, RequestBody::Empty, headers)
            .await
    }

    pub async fn options(
        &self,
        url: impl AsRef<str>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        self.request(Method::OPTIONS, url, RequestBody::Empty, headers)
            .await
    }

    pub async fn delete(
        &self,
        url: impl AsRef<str>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        self.request(Method::DELETE, url, RequestBody::Empty, headers)
            .await
    }

    pub async fn post(
        &self,
        url: impl AsRef<str>,
        body: impl Into<RequestBody>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        self.request(Method::POST, url, body, headers).await
    }

    pub async fn put(
        &self,
        url: impl AsRef<str>,
        body: impl Into<RequestBody>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        self.request(Method::PUT, url, body, headers).await
    }

    pub async fn patch(
        &self,
        url: impl AsRef<str>,
        body: impl Into<RequestBody>,
        headers: &Headers,
    ) -> Result<Response, HttpError> {
        self.request(Method::PATCH, url, body, headers).await
    }

    /// Releases this handle on the connection pool.
    pub fn dispose(self) {
        debug!(handlers = self.handlers.len(), "disposing http client");
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("default_headers", &self.default_headers.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Builder for [`HttpClient`].
#[derive(Default)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    headers: Headers,
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl HttpClientBuilder {
    pub fn config(self, config: HttpClientConfig) -> Self {
        HttpClientBuilder { config, ..self }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Adds a default header, overriding one from the configuration.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Appends a handler to the chain.
    pub fn handler<H>(self, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        self.shared_handler(Arc::new(handler))
    }

    pub fn shared_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<HttpClient, HttpError> {
        let config = self.config;

        let mut builder = reqwest::Client::builder().redirect(redirect_policy(&config.redirect));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(timeout) = config.socket_timeout {
            builder = builder.read_timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(max_sockets) = config.max_sockets {
            builder = builder.pool_max_idle_per_host(max_sockets);
        }
        builder = if config.keep_alive {
            builder.tcp_keepalive(KEEP_ALIVE_INTERVAL)
        } else {
            builder.pool_max_idle_per_host(0)
        };

        let mut middleware = reqwest_middleware::ClientBuilder::new(builder.build()?);
        if config.retry.allow_retries && config.retry.max_retries > 0 {
            middleware = middleware.with(RetryMiddleware::new(config.retry.max_retries));
        }

        let mut default_headers = config.default_headers();
        default_headers.extend_from(&self.headers);

        Ok(HttpClient {
            inner: middleware.build(),
            default_headers,
            handlers: self.handlers,
        })
    }
}

fn redirect_policy(policy: &RedirectPolicy) -> redirect::Policy {
    if !policy.allow_redirects {
        return redirect::Policy::none();
    }

    let max_redirects = policy.max_redirects;
    let allow_downgrade = policy.allow_redirect_downgrade;
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.stop();
        }
        let downgrade = attempt.url().scheme() == "http"
            && attempt
                .previous()
                .last()
                .is_some_and(|previous| previous.scheme() == "https");
        if downgrade && !allow_downgrade {
            return attempt.error("redirect from https to http is not allowed");
        }
        attempt.follow()
    })
}
