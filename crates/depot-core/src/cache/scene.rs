//! SceneCache: the content-cache discipline for composite scenes.
//!
//! Differs from [`ResourceCache`](super::ResourceCache) in one way: handing a
//! scene back is asynchronous. A removed scene keeps its slot until the
//! provider confirms the unload. `release` waits for that, a load that needs
//! room waits for the evicted scene to unload before it takes the slot, and
//! an acquire of a key that is unloading waits and then loads it afresh.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use depot_abstraction::{SceneLoadMode, SceneProvider, TypeTag};
use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::content::downcast;
use super::operation::{LoadCompleter, LoadOperation};
use super::registry::{
    panic_detail, settle_fetch, Begin, Disposal, FetchGuard, Install, Registry, Release,
};
use super::types::{CacheEntry, CacheStats, PreloadReport, ReleaseOutcome};
use crate::error::CacheError;

const LOAD_KIND: &str = "scene-load";
const UNLOAD_KIND: &str = "scene-unload";

/// Cache for scenes.
#[derive(Clone)]
pub struct SceneCache {
    provider: Arc<dyn SceneProvider>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for SceneCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneCache")
            .field("capacity", &self.registry.capacity())
            .field("stats", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

impl SceneCache {
    /// Create a scene cache backed by `provider`.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(
        provider: Arc<dyn SceneProvider>,
        config: &CacheConfig,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;
        Ok(Self {
            provider,
            registry: Arc::new(Registry::new(
                LOAD_KIND,
                config.max_scene_entries,
                Disposal::Deferred,
            )),
        })
    }

    /// Get the scene for `key`, loading it with `mode` if needed.
    ///
    /// Callers joining a load already in flight get that load's scene; the
    /// mode of the caller that started it applies.
    ///
    /// # Errors
    /// Returns `CacheError` if the key is empty, the load fails, or the key
    /// holds a different type.
    pub async fn acquire<S>(&self, key: &str, mode: SceneLoadMode) -> Result<Arc<S>, CacheError>
    where
        S: Any + Send + Sync,
    {
        self.acquire_with_progress(key, mode, |_| {}).await
    }

    /// Same as [`acquire`](Self::acquire), reporting load progress.
    ///
    /// # Errors
    /// Returns `CacheError` if the key is empty, the load fails, or the key
    /// holds a different type.
    pub async fn acquire_with_progress<S, F>(
        &self,
        key: &str,
        mode: SceneLoadMode,
        on_progress: F,
    ) -> Result<Arc<S>, CacheError>
    where
        S: Any + Send + Sync,
        F: FnMut(f32) + Send,
    {
        let type_tag = TypeTag::of::<S>();
        let payload = loop {
            match self.registry.begin(key, type_tag)? {
                Begin::Hit(payload) => break payload,
                Begin::Join(waiter) => break waiter.wait(on_progress).await?,
                Begin::Start { waiter, completer } => {
                    self.spawn_load(key.to_string(), type_tag, mode, completer);
                    break waiter.wait(on_progress).await?;
                }
                Begin::Unloading(done) => done.finished().await,
            }
        };
        downcast(key, &payload)
    }

    fn spawn_load(
        &self,
        key: String,
        type_tag: TypeTag,
        mode: SceneLoadMode,
        completer: LoadCompleter,
    ) {
        let provider = Arc::clone(&self.provider);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let load_id = completer.load_id();
            let guard = FetchGuard::new(Arc::clone(&registry), &key, load_id);
            let fetched = settle_fetch(
                LOAD_KIND,
                &key,
                type_tag,
                provider.load_scene(&key, type_tag, mode, completer.progress_sink()),
            )
            .await;

            match fetched {
                Ok(scene) => {
                    loop {
                        match registry.install(&key, load_id, &scene) {
                            Install::Installed | Install::Detached => break,
                            Install::Evicted(victim) => {
                                unload(Arc::clone(&provider), Arc::clone(&registry), victim).await;
                            }
                            Install::Wait(done) => done.finished().await,
                        }
                    }
                    completer.succeed(scene);
                }
                Err(err) => {
                    registry.fail(&key, load_id);
                    completer.fail(err);
                }
            }
            guard.settle();
        });
    }

    /// Drop one reference to `key`. At zero the scene leaves the cache and
    /// this waits until the provider has unloaded it and its slot is free.
    ///
    /// Releasing a key that is not cached only logs a warning.
    pub async fn release(&self, key: &str) -> ReleaseOutcome {
        match self.registry.release(key, None) {
            Release::Retained(remaining) => ReleaseOutcome::Retained(remaining),
            Release::Removed(entry) => {
                unload(Arc::clone(&self.provider), Arc::clone(&self.registry), entry).await;
                ReleaseOutcome::Released
            }
            Release::Untracked => ReleaseOutcome::Untracked,
            Release::TypeMismatch => ReleaseOutcome::TypeMismatch,
        }
    }

    /// Acquire every scene concurrently and wait for all of them.
    pub async fn preload<S, K>(&self, keys: &[K], mode: SceneLoadMode) -> PreloadReport
    where
        S: Any + Send + Sync,
        K: AsRef<str> + Sync,
    {
        let results = join_all(keys.iter().map(|key| async move {
            let key = key.as_ref();
            (key.to_string(), self.acquire::<S>(key, mode).await.map(|_| ()))
        }))
        .await;

        let report = PreloadReport::from_results(results);
        if !report.is_complete() {
            let failed: Vec<&str> = report.failed.iter().map(|(key, _)| key.as_str()).collect();
            warn!(
                operation = LOAD_KIND,
                failed = ?failed,
                loaded = report.loaded.len(),
                "Scene preload finished with failures"
            );
        }
        report
    }

    /// Unload every cached scene regardless of reference counts, waiting
    /// for all unloads to finish.
    pub async fn clear_all(&self) {
        let drained = self.registry.drain();
        let cleared_count = drained.len();
        join_all(
            drained
                .into_iter()
                .map(|entry| unload(Arc::clone(&self.provider), Arc::clone(&self.registry), entry)),
        )
        .await;
        info!(operation = UNLOAD_KIND, cleared_count, "Cleared all scenes from cache");
    }

    /// The in-flight load for `key`, if one is running.
    #[must_use]
    pub fn operation(&self, key: &str) -> Option<LoadOperation> {
        self.registry.operation(key)
    }

    /// Whether `key` is cached.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.registry.contains(key)
    }

    /// Current reference count of a cached scene.
    #[must_use]
    pub fn ref_count(&self, key: &str) -> Option<u32> {
        self.registry.ref_count(key)
    }

    /// Number of cached scenes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// `true` when no scene is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached scene keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Maximum number of cached scenes.
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

/// Unloads a scene on its own task and waits for it, so a caller that stops
/// waiting cannot cut the unload short. The slot is freed once the provider
/// is done, whether the unload succeeded, failed or panicked; failures are
/// logged.
async fn unload(provider: Arc<dyn SceneProvider>, registry: Arc<Registry>, entry: CacheEntry) {
    let key = entry.key.clone();
    let task = tokio::spawn(async move {
        let unloaded = AssertUnwindSafe(provider.unload_scene(&entry.key, &entry.payload))
            .catch_unwind()
            .await;
        registry.finish_unload(&entry.key);
        match unloaded {
            Ok(Ok(())) => debug!(operation = UNLOAD_KIND, key = %entry.key, "Scene unloaded"),
            Ok(Err(err)) => {
                error!(
                    operation = UNLOAD_KIND,
                    key = %entry.key,
                    error = %err,
                    "Scene unload failed"
                );
            }
            Err(panic) => {
                let detail = panic_detail(&*panic);
                error!(
                    operation = UNLOAD_KIND,
                    key = %entry.key,
                    detail = %detail,
                    "Scene unload faulted"
                );
            }
        }
    });
    if let Err(join_err) = task.await {
        error!(operation = UNLOAD_KIND, key = %key, error = %join_err, "Scene unload task failed");
    }
}
