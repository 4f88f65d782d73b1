//! Configuration for the content and scene caches.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration for both caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of content units kept cached (default: 100).
    #[serde(default = "default_max_content_entries")]
    pub max_content_entries: usize,

    /// Maximum number of scenes kept loaded (default: 10).
    #[serde(default = "default_max_scene_entries")]
    pub max_scene_entries: usize,
}

fn default_max_content_entries() -> usize {
    100
}

fn default_max_scene_entries() -> usize {
    10
}

/// Errors that can occur while loading or validating cache configuration.
#[derive(Debug, Error)]
pub enum CacheConfigError {
    /// Invalid content capacity (must be > 0).
    #[error("Invalid max content entries: must be greater than 0")]
    InvalidMaxContentEntries,

    /// Invalid scene capacity (must be > 0).
    #[error("Invalid max scene entries: must be greater than 0")]
    InvalidMaxSceneEntries,

    /// The config file could not be read.
    #[error("Failed to read cache config {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has the wrong shape.
    #[error("Failed to parse cache config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_content_entries: default_max_content_entries(),
            max_scene_entries: default_max_scene_entries(),
        }
    }
}

/// On-disk layout: cache settings live under a `[cache]` table.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: CacheConfig,
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any capacity is zero.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.max_content_entries == 0 {
            return Err(CacheConfigError::InvalidMaxContentEntries);
        }

        if self.max_scene_entries == 0 {
            return Err(CacheConfigError::InvalidMaxSceneEntries);
        }

        Ok(())
    }

    /// Parse configuration from TOML text with an optional `[cache]` table.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if parsing or validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, CacheConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        file.cache.validate()?;
        Ok(file.cache)
    }

    /// Read configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CacheConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
