//! Metrics declaration and recording.
//!
//! Every function here is a no-op unless the `metrics` feature is enabled.

use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of lookups that found an entry.
    pub static ref LOOKUP_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stowbox_lookup_hit_total",
            "Total number of cache lookups that found an entry."
        );
        "stowbox_lookup_hit_total"
    };
    /// Track number of lookups answered with no entry.
    pub static ref LOOKUP_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stowbox_lookup_miss_total",
            "Total number of cache lookups answered with no entry."
        );
        "stowbox_lookup_miss_total"
    };
    /// Track number of reservations already held by another writer.
    pub static ref RESERVATION_CONFLICT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stowbox_reservation_conflict_total",
            "Total number of reservations rejected because another writer holds the key."
        );
        "stowbox_reservation_conflict_total"
    };
    pub static ref BYTES_UPLOADED: &'static str = {
        metrics::describe_counter!(
            "stowbox_uploaded_bytes_total",
            metrics::Unit::Bytes,
            "Total bytes sent in chunk uploads."
        );
        "stowbox_uploaded_bytes_total"
    };
    pub static ref BYTES_DOWNLOADED: &'static str = {
        metrics::describe_counter!(
            "stowbox_downloaded_bytes_total",
            metrics::Unit::Bytes,
            "Total bytes written by archive downloads."
        );
        "stowbox_downloaded_bytes_total"
    };
    /// Histogram of chunk upload duration.
    pub static ref CHUNK_UPLOAD_DURATION: &'static str = {
        metrics::describe_histogram!(
            "stowbox_chunk_upload_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of chunk uploads in seconds."
        );
        "stowbox_chunk_upload_duration_seconds"
    };
}

#[cfg(feature = "metrics")]
#[inline]
pub fn record_lookup(hit: bool) {
    let counter = if hit {
        *LOOKUP_HIT_COUNTER
    } else {
        *LOOKUP_MISS_COUNTER
    };
    metrics::counter!(counter).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_lookup(_hit: bool) {}

#[cfg(feature = "metrics")]
#[inline]
pub fn record_reservation_conflict() {
    metrics::counter!(*RESERVATION_CONFLICT_COUNTER).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_reservation_conflict() {}

#[cfg(feature = "metrics")]
#[inline]
pub fn record_chunk_upload(bytes: u64, duration: Duration, success: bool) {
    let status = if success { "success" } else { "error" };
    metrics::histogram!(*CHUNK_UPLOAD_DURATION, "status" => status)
        .record(duration.as_secs_f64());
    if success {
        metrics::counter!(*BYTES_UPLOADED).increment(bytes);
    }
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_chunk_upload(_bytes: u64, _duration: Duration, _success: bool) {}

#[cfg(feature = "metrics")]
#[inline]
pub fn record_download(bytes: u64) {
    metrics::counter!(*BYTES_DOWNLOADED).increment(bytes);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_download(_bytes: u64) {}
