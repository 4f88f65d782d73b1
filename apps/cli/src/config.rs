//! CLI configuration loading and merging.

use std::path::Path;

use anyhow::Context;
use depot_core::CacheConfig;

/// File picked up from the working directory when `--config` is not given.
const LOCAL_CONFIG: &str = "depot.toml";

/// Load and merge cache configuration.
///
/// Configuration precedence:
/// 1. CLI flags (`--max-content`, `--max-scenes`)
/// 2. Explicit config file (`--config`)
/// 3. Local config file (./depot.toml)
/// 4. Defaults
pub fn load_config(
    path: Option<&Path>,
    max_content: Option<usize>,
    max_scenes: Option<usize>,
) -> anyhow::Result<CacheConfig> {
    let mut config = match path {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(LOCAL_CONFIG).is_file() => {
            CacheConfig::load(LOCAL_CONFIG).context("Failed to load ./depot.toml")?
        }
        None => CacheConfig::default(),
    };

    if let Some(max_content) = max_content {
        config.max_content_entries = max_content;
    }
    if let Some(max_scenes) = max_scenes {
        config.max_scene_entries = max_scenes;
    }

    config.validate()?;
    Ok(config)
}
