//! Pluggable HTTP client core.
//!
//! [`HttpClient`] wraps a pooled [`reqwest`] client and adds what a cache
//! service client needs on top of it:
//!
//! - [`Headers`], a case-insensitive header set with comma-joining `add`
//! - [`RequestHandler`], a chain of hooks that prepare requests and may
//!   resolve authentication failures with one retry
//! - [`RequestBody`] and [`ReaderBody`], bodies that stream from any
//!   `AsyncRead` source without buffering it
//! - [`Response`], with status and headers up front and an on-demand body
//!
//! ```no_run
//! use stowbox_http::{BearerCredentialHandler, Headers, HttpClient};
//!
//! # async fn run() -> Result<(), stowbox_http::HttpError> {
//! let client = HttpClient::builder()
//!     .user_agent("stowbox")
//!     .header("Accept", "application/json")
//!     .handler(BearerCredentialHandler::new("token"))
//!     .build()?;
//!
//! let response = client.get("https://example.com/api", &Headers::new()).await?;
//! if response.is_success() {
//!     println!("{}", response.read_body().await?);
//! }
//! client.dispose();
//! # Ok(())
//! # }
//! ```

pub mod body;
mod client;
pub mod config;
mod error;
pub mod handler;
mod headers;
mod response;
pub mod retry;

pub use body::{ReaderBody, RequestBody, pipe};
pub use client::{HttpClient, HttpClientBuilder};
pub use config::{HttpClientConfig, RedirectPolicy, RetryPolicy};
pub use error::HttpError;
pub use handler::{
    BasicCredentialHandler, BearerCredentialHandler, PersonalAccessTokenCredentialHandler,
    PreparedRequest, RequestHandler,
};
pub use headers::Headers;
pub use response::Response;

pub use http::{Method, StatusCode};
pub use url::Url;
