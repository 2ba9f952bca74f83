#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// The cache protocol client.
///
/// [`CacheClient`] implements reservation, concurrent chunked upload, commit,
/// lookup and verified download on top of [`stowbox_http::HttpClient`].
pub mod client;

/// Service endpoint, credentials and upload chunking settings.
pub mod config;

/// Error types for cache operations.
pub mod error;

/// Cache entries and reservation handles.
pub mod entry;

/// Key validation and version derivation.
pub mod key;

/// Hiding pre-signed archive locations from logs.
pub mod mask;

/// Metrics collection for cache transfers.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for:
/// - Lookup hits and misses, reservation conflicts
/// - Bytes uploaded and downloaded
/// - Chunk upload latency
pub mod metrics;

/// Byte ranges of upload chunks.
pub mod range;

pub use client::{CacheClient, CacheClientBuilder};
pub use config::{ServiceConfig, UploadOptions};
pub use entry::{CacheEntry, ReservationId};
pub use error::CacheError;
pub use key::{cache_version, check_key};
pub use mask::{MaskRegistry, SecretMasker, WorkflowCommandMasker};
pub use range::ByteRange;
