//! Caching layer for provider-loaded resources.
//!
//! Two caches share one discipline: loads are deduplicated per key, every
//! successful acquire holds a reference, and a full cache evicts its
//! least-referenced entry to admit a new one.

pub mod config;
pub mod content;
pub mod eviction;
pub mod operation;
pub mod refcount;
mod registry;
pub mod scene;
pub mod types;

pub use config::{CacheConfig, CacheConfigError};
pub use content::ResourceCache;
pub use operation::{LoadOperation, LoadState, LoadStatus};
pub use refcount::{RefCount, RefCountUnderflow};
pub use scene::SceneCache;
pub use types::{CacheStats, PreloadReport, ReleaseOutcome};
