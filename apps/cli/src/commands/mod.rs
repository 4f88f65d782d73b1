//! Command implementations for the Depot CLI.

pub mod label;
pub mod load;
pub mod preload;
pub mod scene;

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use depot_core::{CacheConfig, CacheStats, ResourceCache, SceneCache};

use crate::provider::FsProvider;

/// Both caches, backed by one directory provider.
pub struct Session {
    pub content: ResourceCache,
    pub scenes: SceneCache,
}

impl Session {
    pub fn open(root: &Path, config: &CacheConfig) -> anyhow::Result<Self> {
        if !root.is_dir() {
            anyhow::bail!("Root directory not found: {}", root.display());
        }
        let provider = Arc::new(FsProvider::new(root));
        Ok(Self {
            content: ResourceCache::new(Arc::clone(&provider) as _, config)?,
            scenes: SceneCache::new(provider, config)?,
        })
    }
}

/// Prints a stats snapshot, as a table or as JSON.
pub fn print_stats(title: &str, stats: &CacheStats, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!();
    println!("{}", title.bold().cyan());
    println!("  {:<12} {}", "hits", stats.total_hits);
    println!("  {:<12} {}", "misses", stats.total_misses);
    println!("  {:<12} {}", "joins", stats.total_joins);
    println!("  {:<12} {}", "failures", stats.total_failures);
    println!("  {:<12} {}", "evictions", stats.total_evictions);
    println!("  {:<12} {}", "releases", stats.total_releases);
    println!("  {:<12} {}", "cached", stats.cache_size);
    Ok(())
}
