//! Depot core: a cache-and-loader for provider-backed resources.
//!
//! Given a string key, the caches return a shared handle to the loaded
//! payload. Concurrent requests for the same key share one provider fetch,
//! consumers are reference-counted, and a full cache evicts its
//! least-referenced entry.
//!
//! # Caches
//!
//! - [`ResourceCache`]: content units, released synchronously.
//! - [`SceneCache`]: composite scenes, unloaded asynchronously.
//!
//! Both are plain values: construct one per subsystem and pass clones to
//! whoever needs it.

pub mod cache;
pub mod error;

pub use cache::{
    CacheConfig, CacheConfigError, CacheStats, LoadOperation, LoadState, LoadStatus,
    PreloadReport, ReleaseOutcome, ResourceCache, SceneCache,
};
pub use depot_abstraction::{
    Payload, ProgressSink, ProviderError, ResourceLocation, ResourceProvider, SceneLoadMode,
    SceneProvider, TypeTag,
};
pub use error::CacheError;
