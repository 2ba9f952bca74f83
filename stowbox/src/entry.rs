//! Wire and domain types of the cache protocol.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CacheError;

/// Lookup result as sent by the service.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ArtifactCacheEntry {
    pub cache_key: Option<String>,
    pub scope: Option<String>,
    pub creation_time: Option<String>,
    pub archive_location: Option<String>,
    pub cache_version: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct ReserveCacheRequest<'a> {
    pub key: &'a str,
    pub version: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReserveCacheResponse {
    pub cache_id: Option<i64>,
}

#[derive(Serialize)]
pub(crate) struct CommitCacheRequest {
    pub size: u64,
}

/// A committed cache entry.
///
/// Only produced by decoding a lookup response. The archive location is a
/// pre-signed URL and is kept out of the `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub cache_key: String,
    pub scope: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub archive_location: Url,
    pub cache_version: String,
}

impl TryFrom<ArtifactCacheEntry> for CacheEntry {
    type Error = CacheError;

    fn try_from(raw: ArtifactCacheEntry) -> Result<Self, Self::Error> {
        let location = raw
            .archive_location
            .filter(|location| !location.is_empty())
            .ok_or(CacheError::CacheNotFound)?;

        Ok(CacheEntry {
            cache_key: raw.cache_key.unwrap_or_default(),
            scope: raw.scope.unwrap_or_default(),
            creation_time: raw
                .creation_time
                .as_deref()
                .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
                .map(|time| time.with_timezone(&Utc)),
            archive_location: Url::parse(&location)?,
            cache_version: raw.cache_version.unwrap_or_default(),
        })
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("cache_key", &self.cache_key)
            .field("scope", &self.scope)
            .field("creation_time", &self.creation_time)
            .field("archive_location", &"***")
            .field("cache_version", &self.cache_version)
            .finish()
    }
}

/// Write slot handed out by a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationId(i64);

impl ReservationId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
