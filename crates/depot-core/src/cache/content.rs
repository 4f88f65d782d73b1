//! ResourceCache: deduplicated, reference-counted loading of content units.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use depot_abstraction::{Payload, ResourceProvider, TypeTag};
use futures::future::join_all;
use tracing::{error, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::operation::{LoadCompleter, LoadOperation};
use super::registry::{
    panic_detail, settle_fetch, Begin, Disposal, FetchGuard, Install, Registry, Release,
};
use super::types::{CacheEntry, CacheStats, PreloadReport, ReleaseOutcome};
use crate::error::CacheError;

const LOAD_KIND: &str = "content-load";
const RELEASE_KIND: &str = "content-release";

/// Cache for content units.
///
/// Cloning is cheap and every clone shares the same tables, so one instance
/// can be handed to each consumer that needs it.
#[derive(Clone)]
pub struct ResourceCache {
    provider: Arc<dyn ResourceProvider>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("capacity", &self.registry.capacity())
            .field("stats", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    /// Create a content cache backed by `provider`.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        config: &CacheConfig,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;
        Ok(Self {
            provider,
            registry: Arc::new(Registry::new(
                LOAD_KIND,
                config.max_content_entries,
                Disposal::Immediate,
            )),
        })
    }

    /// Get the payload for `key`, loading it if needed.
    ///
    /// A cached entry is returned without suspending. If a load for the key
    /// is already running, this waits for it instead of starting another.
    /// Every successful call holds one reference until `release`.
    ///
    /// Dropping the returned future does not cancel the load; its result is
    /// still cached for the next caller.
    ///
    /// # Errors
    /// Returns `CacheError` if the key is empty, the load fails, or the key
    /// holds a different type.
    pub async fn acquire<T>(&self, key: &str) -> Result<Arc<T>, CacheError>
    where
        T: Any + Send + Sync,
    {
        self.acquire_with_progress(key, |_| {}).await
    }

    /// Same as [`acquire`](Self::acquire), reporting load progress to
    /// `on_progress`. A cache hit reports nothing.
    ///
    /// # Errors
    /// Returns `CacheError` if the key is empty, the load fails, or the key
    /// holds a different type.
    pub async fn acquire_with_progress<T, F>(
        &self,
        key: &str,
        on_progress: F,
    ) -> Result<Arc<T>, CacheError>
    where
        T: Any + Send + Sync,
        F: FnMut(f32) + Send,
    {
        let type_tag = TypeTag::of::<T>();
        let payload = loop {
            match self.registry.begin(key, type_tag)? {
                Begin::Hit(payload) => break payload,
                Begin::Join(waiter) => break waiter.wait(on_progress).await?,
                Begin::Start { waiter, completer } => {
                    self.spawn_load(key.to_string(), type_tag, completer);
                    break waiter.wait(on_progress).await?;
                }
                Begin::Unloading(done) => done.finished().await,
            }
        };
        downcast(key, &payload)
    }

    /// Get the payload for `key` only if it is already cached.
    ///
    /// Never suspends and never starts a load. A hit counts as one reference.
    #[must_use]
    pub fn try_acquire<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.registry
            .try_hit(key, TypeTag::of::<T>())
            .and_then(|payload| payload.downcast::<T>())
    }

    fn spawn_load(&self, key: String, type_tag: TypeTag, completer: LoadCompleter) {
        let provider = Arc::clone(&self.provider);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let load_id = completer.load_id();
            let guard = FetchGuard::new(Arc::clone(&registry), &key, load_id);
            let fetched = settle_fetch(
                LOAD_KIND,
                &key,
                type_tag,
                provider.load(&key, type_tag, completer.progress_sink()),
            )
            .await;

            match fetched {
                Ok(payload) => {
                    loop {
                        match registry.install(&key, load_id, &payload) {
                            Install::Installed | Install::Detached => break,
                            Install::Evicted(victim) => {
                                release_to_provider(provider.as_ref(), &victim);
                            }
                            Install::Wait(done) => done.finished().await,
                        }
                    }
                    completer.succeed(payload);
                }
                Err(err) => {
                    registry.fail(&key, load_id);
                    completer.fail(err);
                }
            }
            guard.settle();
        });
    }

    /// Drop one reference to `key`. At zero the entry is removed and the
    /// payload handed back to the provider.
    ///
    /// Releasing a key that is not cached only logs a warning.
    pub fn release(&self, key: &str) -> ReleaseOutcome {
        self.release_checked(key, None)
    }

    /// Like [`release`](Self::release), but refuses (with a warning) if the
    /// cached payload is not a `T`.
    pub fn release_typed<T: Any>(&self, key: &str) -> ReleaseOutcome {
        self.release_checked(key, Some(TypeTag::of::<T>()))
    }

    fn release_checked(&self, key: &str, type_tag: Option<TypeTag>) -> ReleaseOutcome {
        match self.registry.release(key, type_tag) {
            Release::Retained(remaining) => ReleaseOutcome::Retained(remaining),
            Release::Removed(entry) => {
                release_to_provider(self.provider.as_ref(), &entry);
                ReleaseOutcome::Released
            }
            Release::Untracked => ReleaseOutcome::Untracked,
            Release::TypeMismatch => ReleaseOutcome::TypeMismatch,
        }
    }

    /// Remove `key` regardless of how many references it holds.
    ///
    /// Returns `false` if nothing was cached under the key.
    pub fn force_release(&self, key: &str) -> bool {
        match self.registry.force_remove(key) {
            Some(entry) => {
                info!(
                    operation = RELEASE_KIND,
                    key = %key,
                    ref_count = entry.ref_count.get(),
                    "Force released"
                );
                release_to_provider(self.provider.as_ref(), &entry);
                true
            }
            None => false,
        }
    }

    /// Acquire every key concurrently and wait for all of them.
    ///
    /// One failure does not cancel the others; failures are logged and
    /// reported, never returned as an error.
    pub async fn preload<T, S>(&self, keys: &[S]) -> PreloadReport
    where
        T: Any + Send + Sync,
        S: AsRef<str> + Sync,
    {
        let results = join_all(keys.iter().map(|key| async move {
            let key = key.as_ref();
            (key.to_string(), self.acquire::<T>(key).await.map(|_| ()))
        }))
        .await;

        let report = PreloadReport::from_results(results);
        if !report.is_complete() {
            let failed: Vec<&str> = report.failed.iter().map(|(key, _)| key.as_str()).collect();
            warn!(
                operation = LOAD_KIND,
                failed = ?failed,
                loaded = report.loaded.len(),
                "Preload finished with failures"
            );
        }
        report
    }

    /// Acquire everything a label resolves to.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the label resolves to nothing.
    pub async fn acquire_label<T>(
        &self,
        label: &str,
    ) -> Result<Vec<(String, Result<Arc<T>, CacheError>)>, CacheError>
    where
        T: Any + Send + Sync,
    {
        let keys = self.resolve(label, TypeTag::of::<T>()).await?;
        Ok(join_all(keys.into_iter().map(|key| async move {
            let result = self.acquire::<T>(&key).await;
            (key, result)
        }))
        .await)
    }

    /// Release once every key a label resolves to, checking each cached
    /// payload is a `T`.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the label resolves to nothing.
    pub async fn release_label<T: Any>(
        &self,
        label: &str,
    ) -> Result<Vec<(String, ReleaseOutcome)>, CacheError> {
        let keys = self.resolve(label, TypeTag::of::<T>()).await?;
        Ok(keys
            .into_iter()
            .map(|key| {
                let outcome = self.release_typed::<T>(&key);
                (key, outcome)
            })
            .collect())
    }

    async fn resolve(&self, label: &str, type_tag: TypeTag) -> Result<Vec<String>, CacheError> {
        if label.is_empty() {
            error!(operation = LOAD_KIND, "Rejected empty label");
            return Err(CacheError::InvalidKey);
        }
        let locations = self.provider.locate(label, type_tag).await.map_err(|err| {
            error!(operation = LOAD_KIND, key = %label, message = %err, "Failed to resolve label");
            CacheError::from_provider(label, err)
        })?;
        if locations.is_empty() {
            error!(operation = LOAD_KIND, key = %label, "Label resolved to no resources");
            return Err(CacheError::NotFound(label.to_string()));
        }
        Ok(locations.into_iter().map(|location| location.primary_key).collect())
    }

    /// Release every cached entry regardless of reference counts.
    ///
    /// Meant for teardown. Loads still in flight are not affected.
    pub fn clear_all(&self) {
        let drained = self.registry.drain();
        let cleared_count = drained.len();
        for entry in &drained {
            release_to_provider(self.provider.as_ref(), entry);
        }
        info!(operation = RELEASE_KIND, cleared_count, "Cleared all content from cache");
    }

    /// The in-flight load for `key`, if one is running.
    #[must_use]
    pub fn operation(&self, key: &str) -> Option<LoadOperation> {
        self.registry.operation(key)
    }

    /// Whether `key` is cached (not merely loading).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.registry.contains(key)
    }

    /// Current reference count of a cached key.
    #[must_use]
    pub fn ref_count(&self, key: &str) -> Option<u32> {
        self.registry.ref_count(key)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Maximum number of cached entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.registry.stats()
    }
}

/// Hands a payload back to the provider. A provider error or panic is
/// logged; the entry is gone from the cache either way.
fn release_to_provider(provider: &dyn ResourceProvider, entry: &CacheEntry) {
    match panic::catch_unwind(AssertUnwindSafe(|| provider.release(&entry.key, &entry.payload))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(
                operation = RELEASE_KIND,
                key = %entry.key,
                error = %err,
                "Provider failed to release payload"
            );
        }
        Err(panic) => {
            let detail = panic_detail(&*panic);
            error!(
                operation = RELEASE_KIND,
                key = %entry.key,
                detail = %detail,
                "Provider release faulted"
            );
        }
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(
    key: &str,
    payload: &Payload,
) -> Result<Arc<T>, CacheError> {
    payload
        .downcast::<T>()
        .ok_or_else(|| CacheError::type_mismatch(key, TypeTag::of::<T>(), payload.type_tag()))
}
