//! Preload command implementation.

use std::path::Path;

use colored::Colorize;
use depot_core::CacheConfig;

use super::{Session, print_stats};

/// Execute the preload command.
pub async fn execute(
    root: &Path,
    config: &CacheConfig,
    keys: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let session = Session::open(root, config)?;
    let report = session.content.preload::<Vec<u8>, _>(&keys).await;

    if !json {
        println!("{}", format!("Preloaded {} of {} keys", report.loaded.len(), keys.len()).bold());
        for key in &report.loaded {
            println!("  {} {}", "✓".green(), key);
        }
    }
    for (key, err) in &report.failed {
        eprintln!("  {} {}: {}", "✗".red(), key, err);
    }

    print_stats("Content cache", &session.content.stats(), json)?;

    if !report.is_complete() {
        anyhow::bail!("{} of {} keys failed to preload", report.failed.len(), keys.len());
    }
    Ok(())
}
