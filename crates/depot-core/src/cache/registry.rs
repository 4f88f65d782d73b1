//! Key tables shared by the content and scene caches.
//!
//! A key lives in at most one of three tables: `entries` (loaded and
//! reference-counted), `in_flight` (a fetch is running) or `unloading` (removed
//! from the cache, still being handed back). Every lookup-or-create step happens
//! under one mutex, so two callers can never both start a fetch for the same
//! key. The mutex is never held across an await point.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use depot_abstraction::{Payload, ProviderError, TypeTag};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::eviction;
use super::operation::{LoadCompleter, LoadOperation};
use super::refcount::RefCount;
use super::types::{CacheEntry, CacheStats};
use crate::error::CacheError;

/// When a removed entry gives its slot back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposal {
    /// As soon as it leaves `entries`. Used when handing back is synchronous.
    Immediate,
    /// Only after [`Registry::finish_unload`]. Until then the key stays in
    /// `unloading`, counts against capacity, and cannot be acquired.
    Deferred,
}

/// A fetch that has started but not finished.
#[derive(Debug)]
struct InFlight {
    load_id: u64,
    type_tag: TypeTag,
    operation: LoadOperation,
    /// Callers currently waiting on this fetch. Becomes the entry's
    /// reference count when the fetch succeeds.
    waiters: u32,
}

#[derive(Debug, Default)]
struct Tables {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
    unloading: HashMap<String, watch::Sender<bool>>,
    next_load_id: u64,
    stats: CacheStats,
}

/// Outcome of the lookup-or-create step of an acquire.
#[derive(Debug)]
pub(crate) enum Begin {
    /// Cached: the reference is already counted.
    Hit(Payload),
    /// Attached to a fetch already in flight.
    Join(Waiter),
    /// Registered a new fetch; the caller must run it through `completer`.
    Start {
        waiter: Waiter,
        completer: LoadCompleter,
    },
    /// The key is still being handed back; acquire again once it is done.
    Unloading(UnloadWait),
}

/// Outcome of trying to install a finished fetch.
#[derive(Debug)]
pub(crate) enum Install {
    /// The entry is cached.
    Installed,
    /// The cache was full; this entry was removed to make room and must be
    /// handed back to the provider before installing again.
    Evicted(CacheEntry),
    /// The cache is full of entries that are still being handed back; install
    /// again once one of them is done.
    Wait(UnloadWait),
    /// The fetch is no longer registered (the cache was torn down).
    Detached,
}

/// Outcome of a release at the table level.
#[derive(Debug)]
pub(crate) enum Release {
    Retained(u32),
    Removed(CacheEntry),
    Untracked,
    TypeMismatch,
}

/// One caller's attachment to an in-flight fetch.
///
/// Dropping a waiter that never saw the result (the caller gave up) takes
/// its reference back out of the count.
#[derive(Debug)]
pub(crate) struct Waiter {
    registry: Arc<Registry>,
    key: String,
    load_id: u64,
    operation: LoadOperation,
    settled: bool,
}

impl Waiter {
    pub(crate) async fn wait<F>(mut self, on_progress: F) -> Result<Payload, CacheError>
    where
        F: FnMut(f32) + Send,
    {
        let result = self.operation.wait_with_progress(on_progress).await;
        self.settled = true;
        result
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.detach(&self.key, self.load_id);
        }
    }
}

/// Resolves once a deferred removal has finished.
#[derive(Debug)]
pub(crate) struct UnloadWait(watch::Receiver<bool>);

impl UnloadWait {
    pub(crate) async fn finished(mut self) {
        // A dropped sender also means the removal is over.
        let _ = self.0.wait_for(|done| *done).await;
    }
}

/// Clears a fetch from `in_flight` if its task stops before settling it, so
/// the key can be requested again.
#[derive(Debug)]
pub(crate) struct FetchGuard {
    registry: Arc<Registry>,
    key: String,
    load_id: u64,
    settled: bool,
}

impl FetchGuard {
    pub(crate) fn new(registry: Arc<Registry>, key: &str, load_id: u64) -> Self {
        Self {
            registry,
            key: key.to_string(),
            load_id,
            settled: false,
        }
    }

    /// Marks the fetch as published; dropping the guard is then a no-op.
    pub(crate) fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if !self.settled {
            error!(
                operation = self.registry.load_kind,
                key = %self.key,
                load_id = self.load_id,
                "Load task ended without a result"
            );
            self.registry.fail(&self.key, self.load_id);
        }
    }
}

/// The synchronized key tables of one cache.
#[derive(Debug)]
pub(crate) struct Registry {
    /// Operation kind used in log lines, e.g. `content-load`.
    load_kind: &'static str,
    capacity: usize,
    disposal: Disposal,
    tables: Mutex<Tables>,
}

impl Registry {
    pub(crate) fn new(load_kind: &'static str, capacity: usize, disposal: Disposal) -> Self {
        Self {
            load_kind,
            capacity,
            disposal,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // Table updates never leave the maps half-written, so a poisoned
        // lock still guards consistent data.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hit, join, or register a new fetch for `key`.
    pub(crate) fn begin(
        self: &Arc<Self>,
        key: &str,
        type_tag: TypeTag,
    ) -> Result<Begin, CacheError> {
        if key.is_empty() {
            error!(operation = self.load_kind, "Rejected empty resource key");
            return Err(CacheError::InvalidKey);
        }

        let mut guard = self.lock();
        let tables = &mut *guard;

        if let Some(entry) = tables.entries.get_mut(key) {
            let actual = entry.payload.type_tag();
            if actual != type_tag {
                warn!(
                    operation = self.load_kind,
                    key = %key,
                    expected = %type_tag,
                    actual = %actual,
                    "Type mismatch on cached entry"
                );
                return Err(CacheError::type_mismatch(key, type_tag, actual));
            }
            let ref_count = entry.ref_count.acquire();
            tables.stats.total_hits += 1;
            debug!(operation = self.load_kind, key = %key, ref_count, "Cache hit");
            return Ok(Begin::Hit(entry.payload.clone()));
        }

        if let Some(flight) = tables.in_flight.get_mut(key) {
            if flight.type_tag != type_tag {
                warn!(
                    operation = self.load_kind,
                    key = %key,
                    expected = %type_tag,
                    actual = %flight.type_tag,
                    "Type mismatch on in-flight load"
                );
                return Err(CacheError::type_mismatch(key, type_tag, flight.type_tag));
            }
            flight.waiters += 1;
            tables.stats.total_joins += 1;
            debug!(
                operation = self.load_kind,
                key = %key,
                waiters = flight.waiters,
                "Joined in-flight load"
            );
            let waiter = Waiter {
                registry: Arc::clone(self),
                key: key.to_string(),
                load_id: flight.load_id,
                operation: flight.operation.clone(),
                settled: false,
            };
            return Ok(Begin::Join(waiter));
        }

        if let Some(done) = tables.unloading.get(key) {
            debug!(
                operation = self.load_kind,
                key = %key,
                "Waiting for unload before loading again"
            );
            return Ok(Begin::Unloading(UnloadWait(done.subscribe())));
        }

        let load_id = tables.next_load_id;
        tables.next_load_id += 1;
        tables.stats.total_misses += 1;

        let (operation, completer) = LoadOperation::new(key, load_id);
        tables.in_flight.insert(
            key.to_string(),
            InFlight {
                load_id,
                type_tag,
                operation: operation.clone(),
                waiters: 1,
            },
        );
        debug!(operation = self.load_kind, key = %key, load_id, "Cache miss, starting load");

        let waiter = Waiter {
            registry: Arc::clone(self),
            key: key.to_string(),
            load_id,
            operation,
            settled: false,
        };
        Ok(Begin::Start { waiter, completer })
    }

    /// Acquires a cached entry without ever starting a fetch.
    pub(crate) fn try_hit(&self, key: &str, type_tag: TypeTag) -> Option<Payload> {
        let mut guard = self.lock();
        let tables = &mut *guard;
        let entry = tables.entries.get_mut(key)?;
        if entry.payload.type_tag() != type_tag {
            return None;
        }
        entry.ref_count.acquire();
        tables.stats.total_hits += 1;
        Some(entry.payload.clone())
    }

    /// Moves a finished fetch into the entry table.
    ///
    /// Entries still being handed back count against capacity. When the
    /// cache is full, either one of those is waited for or the
    /// least-referenced entry is removed and returned; the caller disposes of
    /// it and calls `install` again.
    pub(crate) fn install(&self, key: &str, load_id: u64, payload: &Payload) -> Install {
        let mut guard = self.lock();
        let tables = &mut *guard;

        if !tables.in_flight.get(key).is_some_and(|flight| flight.load_id == load_id) {
            warn!(
                operation = self.load_kind,
                key = %key,
                load_id,
                "Finished load is no longer registered"
            );
            return Install::Detached;
        }

        if tables.entries.len() + tables.unloading.len() >= self.capacity {
            if let Some(done) = tables.unloading.values().next() {
                debug!(
                    operation = self.load_kind,
                    key = %key,
                    unloading = tables.unloading.len(),
                    "Cache full, waiting for an unload to finish"
                );
                return Install::Wait(UnloadWait(done.subscribe()));
            }
            if let Some(victim) = eviction::least_referenced(&tables.entries)
                .and_then(|victim| tables.entries.remove(&victim))
            {
                self.retire_locked(tables, &victim);
                tables.stats.total_evictions += 1;
                tables.stats.cache_size = tables.entries.len();
                info!(
                    operation = self.load_kind,
                    key = %victim.key,
                    ref_count = victim.ref_count.get(),
                    age_ms = victim.created_at.elapsed().as_millis(),
                    incoming = %key,
                    "Evicted least-referenced entry"
                );
                return Install::Evicted(victim);
            }
        }

        let Some(flight) = tables.in_flight.remove(key) else {
            return Install::Detached;
        };
        let ref_count = RefCount::new(flight.waiters);
        tables.entries.insert(
            key.to_string(),
            CacheEntry::new(key.to_string(), payload.clone(), ref_count, load_id),
        );
        tables.stats.cache_size = tables.entries.len();
        info!(operation = self.load_kind, key = %key, ref_count = ref_count.get(), "Cached");
        Install::Installed
    }

    /// Drops a failed fetch so the key can be requested again.
    pub(crate) fn fail(&self, key: &str, load_id: u64) {
        let mut guard = self.lock();
        let tables = &mut *guard;
        if tables.in_flight.get(key).is_some_and(|flight| flight.load_id == load_id) {
            tables.in_flight.remove(key);
        }
        tables.stats.total_failures += 1;
    }

    /// Takes back the reference of a caller that stopped waiting.
    fn detach(&self, key: &str, load_id: u64) {
        let mut guard = self.lock();
        let tables = &mut *guard;
        if let Some(flight) = tables.in_flight.get_mut(key).filter(|f| f.load_id == load_id) {
            flight.waiters = flight.waiters.saturating_sub(1);
            debug!(
                operation = self.load_kind,
                key = %key,
                waiters = flight.waiters,
                "Caller stopped waiting; load continues"
            );
        } else if let Some(entry) = tables.entries.get_mut(key).filter(|e| e.load_id == load_id) {
            entry.ref_count.forfeit();
            debug!(
                operation = self.load_kind,
                key = %key,
                ref_count = entry.ref_count.get(),
                "Caller left before claiming its reference"
            );
        }
    }

    /// Drops one reference; removes the entry once none are left.
    pub(crate) fn release(&self, key: &str, type_tag: Option<TypeTag>) -> Release {
        let mut guard = self.lock();
        let tables = &mut *guard;

        let Some(entry) = tables.entries.get_mut(key) else {
            warn!(
                operation = self.load_kind,
                key = %key,
                "Attempted to release untracked resource"
            );
            return Release::Untracked;
        };

        if let Some(expected) = type_tag {
            let actual = entry.payload.type_tag();
            if actual != expected {
                warn!(
                    operation = self.load_kind,
                    key = %key,
                    expected = %expected,
                    actual = %actual,
                    "Type mismatch on release"
                );
                return Release::TypeMismatch;
            }
        }

        match entry.ref_count.release() {
            Ok(remaining) if remaining > 0 => Release::Retained(remaining),
            Ok(_) => self
                .remove_locked(tables, key)
                .map_or(Release::Untracked, Release::Removed),
            Err(underflow) => {
                warn!(
                    operation = self.load_kind,
                    key = %key,
                    error = %underflow,
                    "Released more times than acquired"
                );
                self.remove_locked(tables, key)
                    .map_or(Release::Untracked, Release::Removed)
            }
        }
    }

    /// Removes an entry regardless of its reference count.
    pub(crate) fn force_remove(&self, key: &str) -> Option<CacheEntry> {
        let mut guard = self.lock();
        self.remove_locked(&mut guard, key)
    }

    /// Removes every entry. In-flight fetches are left to finish.
    pub(crate) fn drain(&self) -> Vec<CacheEntry> {
        let mut guard = self.lock();
        let tables = &mut *guard;
        let drained: Vec<CacheEntry> = tables.entries.drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            self.retire_locked(tables, entry);
        }
        tables.stats.total_releases += drained.len() as u64;
        tables.stats.cache_size = 0;
        drained
    }

    fn remove_locked(&self, tables: &mut Tables, key: &str) -> Option<CacheEntry> {
        let entry = tables.entries.remove(key)?;
        self.retire_locked(tables, &entry);
        tables.stats.total_releases += 1;
        tables.stats.cache_size = tables.entries.len();
        debug!(operation = self.load_kind, key = %key, "Removed entry");
        Some(entry)
    }

    fn retire_locked(&self, tables: &mut Tables, entry: &CacheEntry) {
        if self.disposal == Disposal::Deferred {
            tables.unloading.insert(entry.key.clone(), watch::channel(false).0);
        }
    }

    /// Gives back the slot of an entry removed under [`Disposal::Deferred`]
    /// and wakes everything waiting on it.
    pub(crate) fn finish_unload(&self, key: &str) {
        let done = self.lock().unloading.remove(key);
        if let Some(done) = done {
            done.send_replace(true);
            debug!(operation = self.load_kind, key = %key, "Slot freed after unload");
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub(crate) fn ref_count(&self, key: &str) -> Option<u32> {
        self.lock().entries.get(key).map(|entry| entry.ref_count.get())
    }

    pub(crate) fn operation(&self, key: &str) -> Option<LoadOperation> {
        self.lock().in_flight.get(key).map(|flight| flight.operation.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let tables = self.lock();
        let mut stats = tables.stats.clone();
        stats.cache_size = tables.entries.len();
        stats.in_flight = tables.in_flight.len();
        stats.unloading = tables.unloading.len();
        stats
    }
}

/// Runs a provider fetch, containing panics, and turns the outcome into a
/// cache result. Every failure is logged here with the operation kind.
pub(crate) async fn settle_fetch<F>(
    load_kind: &'static str,
    key: &str,
    type_tag: TypeTag,
    fetch: F,
) -> Result<Payload, CacheError>
where
    F: Future<Output = Result<Payload, ProviderError>>,
{
    match AssertUnwindSafe(fetch).catch_unwind().await {
        Ok(Ok(payload)) if payload.type_tag() == type_tag => Ok(payload),
        Ok(Ok(payload)) => {
            let actual = payload.type_tag();
            error!(
                operation = load_kind,
                key = %key,
                expected = %type_tag,
                actual = %actual,
                "Provider returned a payload of the wrong type"
            );
            Err(CacheError::type_mismatch(key, type_tag, actual))
        }
        Ok(Err(err)) => {
            error!(operation = load_kind, key = %key, message = %err, "Load failed");
            Err(CacheError::from_provider(key, err))
        }
        Err(panic) => {
            let detail = panic_detail(&*panic);
            error!(operation = load_kind, key = %key, detail = %detail, "Load faulted");
            Err(CacheError::Faulted {
                key: key.to_string(),
                detail,
            })
        }
    }
}

pub(crate) fn panic_detail(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "provider panicked".to_string())
}
