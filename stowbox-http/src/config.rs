//! Client configuration.
//!
//! [`HttpClientConfig`] is plain data: it can be built in code or
//! deserialized, and is applied once when the
//! [`HttpClient`](crate::HttpClient) is built.
//!
//! ```
//! use std::time::Duration;
//! use stowbox_http::HttpClientConfig;
//!
//! let config: HttpClientConfig = serde_json::from_str(r#"{
//!     "user_agent": "stowbox",
//!     "socket_timeout": "30s",
//!     "retry": { "allow_retries": true, "max_retries": 3 }
//! }"#).unwrap();
//!
//! assert_eq!(config.socket_timeout, Some(Duration::from_secs(30)));
//! assert!(config.redirect.allow_redirects);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::headers::Headers;

/// Redirect handling.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RedirectPolicy {
    /// Follow 3xx responses at all.
    pub allow_redirects: bool,
    /// Follow a redirect from `https` to `http`.
    pub allow_redirect_downgrade: bool,
    /// Hops to follow before the 3xx response is returned as-is.
    pub max_redirects: usize,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            allow_redirects: true,
            allow_redirect_downgrade: false,
            max_redirects: 50,
        }
    }
}

/// Retry handling for idempotent requests.
///
/// Retries apply to GET, HEAD, OPTIONS and DELETE requests with a replayable
/// body, after a transport error or a 502, 503 or 504 response.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub allow_retries: bool,
    /// Extra attempts after the first one.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            allow_retries: false,
            max_retries: 1,
        }
    }
}

/// Configuration of an [`HttpClient`](crate::HttpClient).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Value of the `User-Agent` header.
    pub user_agent: Option<String>,
    /// Idle time allowed between two reads on a connection (e.g., "30s").
    #[serde(with = "humantime_serde")]
    pub socket_timeout: Option<Duration>,
    /// Time allowed to establish a connection (e.g., "10s").
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    pub redirect: RedirectPolicy,
    /// Idle connections kept per host.
    pub max_sockets: Option<usize>,
    /// Keep connections open between requests.
    pub keep_alive: bool,
    pub retry: RetryPolicy,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            socket_timeout: None,
            connect_timeout: None,
            redirect: RedirectPolicy::default(),
            max_sockets: None,
            keep_alive: true,
            retry: RetryPolicy::default(),
            headers: BTreeMap::new(),
        }
    }
}

impl HttpClientConfig {
    pub(crate) fn default_headers(&self) -> Headers {
        self.headers.iter().collect()
    }
}
