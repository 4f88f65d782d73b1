//! Core data types for the caches.

use depot_abstraction::Payload;
use serde::Serialize;
use std::time::Instant;

use super::refcount::RefCount;
use crate::error::CacheError;

/// A cached, reference-counted payload.
///
/// Entries are owned by the cache; callers only ever see the payload.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    /// Key the entry is stored under.
    pub key: String,
    /// The loaded value, also used to hand it back to the provider.
    pub payload: Payload,
    /// Live acquirers.
    pub ref_count: RefCount,
    /// Identifier of the load that produced this entry.
    pub load_id: u64,
    /// When the entry was installed.
    pub created_at: Instant,
}

impl CacheEntry {
    pub(crate) fn new(key: String, payload: Payload, ref_count: RefCount, load_id: u64) -> Self {
        Self {
            key,
            payload,
            ref_count,
            load_id,
            created_at: Instant::now(),
        }
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Acquires served straight from a cached entry.
    pub total_hits: u64,
    /// Acquires that started a new provider fetch.
    pub total_misses: u64,
    /// Acquires that attached to a fetch already in flight.
    pub total_joins: u64,
    /// Fetches that ended in failure.
    pub total_failures: u64,
    /// Entries removed to make room for a new one.
    pub total_evictions: u64,
    /// Entries removed because their last reference was released (or forced out).
    pub total_releases: u64,
    /// Current number of cached entries.
    pub cache_size: usize,
    /// Current number of fetches in flight.
    pub in_flight: usize,
    /// Entries removed but still being handed back. They keep their slot.
    pub unloading: usize,
}

/// What a release call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The entry is still referenced; carries the remaining count.
    Retained(u32),
    /// The last reference went away and the payload was handed back.
    Released,
    /// Nothing is cached under the key. Logged and ignored.
    Untracked,
    /// The cached payload is not of the type the caller released. Logged and ignored.
    TypeMismatch,
}

/// Result of a batch preload.
#[derive(Debug, Default)]
pub struct PreloadReport {
    /// Keys that are now cached (each holding one more reference).
    pub loaded: Vec<String>,
    /// Keys that failed, with the reason.
    pub failed: Vec<(String, CacheError)>,
}

impl PreloadReport {
    pub(crate) fn from_results(results: Vec<(String, Result<(), CacheError>)>) -> Self {
        let mut report = Self::default();
        for (key, result) in results {
            match result {
                Ok(()) => report.loaded.push(key),
                Err(err) => report.failed.push((key, err)),
            }
        }
        report
    }

    /// `true` when every key loaded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
