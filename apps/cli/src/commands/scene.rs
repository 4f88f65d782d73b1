//! Scene command implementation.

use std::path::Path;

use colored::Colorize;
use depot_core::{CacheConfig, SceneLoadMode};

use super::{Session, print_stats};
use crate::provider::SceneManifest;

/// Execute the scene command.
///
/// Loads the manifest and the content it lists, then releases the content
/// and waits for the scene to unload.
pub async fn execute(
    root: &Path,
    config: &CacheConfig,
    key: &str,
    additive: bool,
) -> anyhow::Result<()> {
    let session = Session::open(root, config)?;
    let mode = if additive { SceneLoadMode::Additive } else { SceneLoadMode::Single };

    let manifest = session.scenes.acquire::<SceneManifest>(key, mode).await?;
    println!("{} {} ({:?})", "Scene".bold().cyan(), manifest.name.bold(), mode);

    let report = session.content.preload::<Vec<u8>, _>(&manifest.contents).await;
    for content in &report.loaded {
        println!("  {} {}", "✓".green(), content);
    }
    for (content, err) in &report.failed {
        eprintln!("  {} {}: {}", "✗".red(), content, err);
    }

    for content in &report.loaded {
        session.content.release(content);
    }
    let outcome = session.scenes.release(key).await;
    println!("Scene {} {:?}", key, outcome);

    print_stats("Scene cache", &session.scenes.stats(), false)?;

    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} scene contents failed to load",
            report.failed.len(),
            manifest.contents.len()
        );
    }
    Ok(())
}
