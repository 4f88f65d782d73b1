//! Provider abstraction layer for Depot.
//!
//! The caches in `depot-core` never touch storage themselves. Every payload
//! they hold is produced by a [`ResourceProvider`] (content units) or a
//! [`SceneProvider`] (composite scenes), and handed back to the same provider
//! when the last consumer lets go of it.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error reported by a resource provider.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderError {
    /// The provider could not resolve anything for the key.
    #[error("No resource location for key '{key}'")]
    NotFound {
        /// The key that failed to resolve.
        key: String,
    },

    /// The provider resolved the key but the fetch itself failed.
    #[error("Load of '{key}' failed: {message}")]
    LoadFailed {
        /// The key being fetched.
        key: String,
        /// Provider-reported message.
        message: String,
    },

    /// Returning a payload (or unloading a scene) failed.
    #[error("Release failed: {0}")]
    ReleaseFailed(String),

    /// Other unexpected errors.
    #[error("Other Provider Error: {0}")]
    Other(String),
}

/// Runtime type tag carried by every [`Payload`].
///
/// Two tags are equal when they describe the same Rust type; the name is
/// kept only for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Tag describing `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Human-readable type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this tag describes `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeTag").field(&self.name).finish()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A loaded value together with its runtime type tag.
///
/// Cloning a payload is cheap: the value itself is shared.
#[derive(Clone)]
pub struct Payload {
    tag: TypeTag,
    value: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    /// Wraps a freshly produced value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps a value that is already shared.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            value,
        }
    }

    /// The runtime type of the wrapped value.
    #[must_use]
    pub const fn type_tag(&self) -> TypeTag {
        self.tag
    }

    /// Returns the value as `Arc<T>`, or `None` if it is not a `T`.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Returns `true` if both payloads share the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("type", &self.tag.name).finish_non_exhaustive()
    }
}

/// Where a key (or label) resolves to inside a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLocation {
    /// Key under which the resolved resource is loaded and cached.
    pub primary_key: String,
    /// Optional identifier of the backing store that serves this location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl ResourceLocation {
    /// Creates a location served under `primary_key`.
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            provider_id: None,
        }
    }
}

/// How a scene is brought in relative to scenes already loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneLoadMode {
    /// Replace whatever is currently active.
    #[default]
    Single,
    /// Load alongside the scenes already active.
    Additive,
}

/// Receives fractional progress from a running load.
///
/// Values are expected in `[0, 1]`; the receiving side clamps and ignores
/// values that would move progress backwards.
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<dyn Fn(f32) + Send + Sync>,
}

impl ProgressSink {
    /// Creates a sink that forwards every report to `report`.
    pub fn new(report: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// A sink that discards every report.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Reports the current completion fraction.
    pub fn report(&self, fraction: f32) {
        (self.report)(fraction);
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

/// Produces and takes back content units.
///
/// All providers must be `Send + Sync`: loads run on spawned tasks.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Resolves a key or label into the locations it refers to.
    ///
    /// The default resolves every key to itself. An empty list means nothing
    /// could be resolved.
    ///
    /// # Errors
    /// Returns a `ProviderError` if resolution itself fails.
    async fn locate(
        &self,
        key: &str,
        type_tag: TypeTag,
    ) -> Result<Vec<ResourceLocation>, ProviderError> {
        let _ = type_tag;
        Ok(vec![ResourceLocation::new(key)])
    }

    /// Fetches the payload for `key`, reporting progress through `progress`.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the key cannot be resolved or the fetch fails.
    async fn load(
        &self,
        key: &str,
        type_tag: TypeTag,
        progress: ProgressSink,
    ) -> Result<Payload, ProviderError>;

    /// Hands a payload back once the cache has dropped it.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the provider fails to release it.
    fn release(&self, key: &str, payload: &Payload) -> Result<(), ProviderError>;
}

/// Produces and unloads composite scenes.
#[async_trait]
pub trait SceneProvider: Send + Sync {
    /// Loads the scene stored under `key`.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the scene cannot be found or loaded.
    async fn load_scene(
        &self,
        key: &str,
        type_tag: TypeTag,
        mode: SceneLoadMode,
        progress: ProgressSink,
    ) -> Result<Payload, ProviderError>;

    /// Unloads a scene. Completes once the provider has let go of it.
    ///
    /// # Errors
    /// Returns a `ProviderError` if unloading fails.
    async fn unload_scene(&self, key: &str, scene: &Payload) -> Result<(), ProviderError>;
}
