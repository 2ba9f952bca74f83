//! Service and upload configuration.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Environment variable holding the runtime service base URL.
pub const SERVICE_URL_VAR: &str = "ACTIONS_RUNTIME_URL";
/// Environment variable holding the runtime bearer token.
pub const RUNTIME_TOKEN_VAR: &str = "ACTIONS_RUNTIME_TOKEN";

/// Where the cache service lives and how to authenticate against it.
///
/// The client never reads the process environment on its own; build this
/// explicitly or with [`ServiceConfig::from_env`].
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    service_url: String,
    runtime_token: String,
}

impl ServiceConfig {
    pub fn new(service_url: impl Into<String>, runtime_token: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            runtime_token: runtime_token.into(),
        }
    }

    /// Reads `ACTIONS_RUNTIME_URL` and `ACTIONS_RUNTIME_TOKEN`.
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// A variable that is missing or blank is a
    /// [`Configuration`](CacheError::Configuration) error.
    pub fn from_vars<F>(lookup: F) -> Result<Self, CacheError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| CacheError::Configuration(format!("{name} is not set")))
        };
        Ok(Self::new(
            required(SERVICE_URL_VAR)?,
            required(RUNTIME_TOKEN_VAR)?,
        ))
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub fn runtime_token(&self) -> &str {
        &self.runtime_token
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service_url", &self.service_url)
            .field("runtime_token", &"***")
            .finish()
    }
}

/// Chunking of file uploads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct UploadOptions {
    /// Chunk uploads in flight at once.
    pub concurrency: usize,
    /// Upper bound of one chunk, in bytes.
    pub max_chunk_size: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_chunk_size: 32 * 1024 * 1024,
        }
    }
}
