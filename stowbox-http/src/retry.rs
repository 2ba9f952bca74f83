//! Retry middleware for idempotent requests.

use std::time::Duration;

use async_trait::async_trait;
use http::{Extensions, Method, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{Jitter, RetryTransientMiddleware, Retryable, RetryableStrategy};

const RETRYABLE_STATUS: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

const RETRYABLE_METHODS: [Method; 4] = [Method::GET, Method::HEAD, Method::OPTIONS, Method::DELETE];

const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);
const MAX_RETRY_INTERVAL: Duration = Duration::from_millis(5 * 1024);

/// Classifies gateway errors and transport failures as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayFailures;

impl RetryableStrategy for GatewayFailures {
    fn handle(&self, result: &Result<Response>) -> Option<Retryable> {
        match result {
            Ok(response) if RETRYABLE_STATUS.contains(&response.status()) => {
                Some(Retryable::Transient)
            }
            Ok(_) => None,
            Err(reqwest_middleware::Error::Reqwest(error))
                if !error.is_builder() && !error.is_redirect() =>
            {
                Some(Retryable::Transient)
            }
            Err(_) => Some(Retryable::Fatal),
        }
    }
}

/// Backoff between attempts: 10ms, doubling per retry, capped at 5.12s.
pub fn backoff_policy(max_retries: u32) -> ExponentialBackoff {
    ExponentialBackoff::builder()
        .retry_bounds(MIN_RETRY_INTERVAL, MAX_RETRY_INTERVAL)
        .jitter(Jitter::None)
        .base(2)
        .build_with_max_retries(max_retries)
}

/// Re-sends idempotent requests after transient failures.
///
/// Other verbs, and requests whose body cannot be cloned, are sent once.
pub struct RetryMiddleware {
    inner: RetryTransientMiddleware<ExponentialBackoff, GatewayFailures>,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32) -> Self {
        Self {
            inner: RetryTransientMiddleware::new_with_policy_and_strategy(
                backoff_policy(max_retries),
                GatewayFailures,
            ),
        }
    }
}

fn is_replayable(request: &Request) -> bool {
    RETRYABLE_METHODS.contains(request.method()) && request.try_clone().is_some()
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !is_replayable(&req) {
            return next.run(req, extensions).await;
        }
        self.inner.handle(req, extensions, next).await
    }
}
