//! Load command implementation.

use std::path::Path;

use colored::Colorize;
use depot_core::CacheConfig;

use super::{Session, print_stats};

/// Execute the load command.
///
/// Acquires each key in order. A repeated key is a cache hit and raises its
/// reference count.
pub async fn execute(
    root: &Path,
    config: &CacheConfig,
    keys: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let session = Session::open(root, config)?;
    let mut failed = 0;

    for key in &keys {
        match session.content.acquire::<Vec<u8>>(key).await {
            Ok(bytes) => {
                if !json {
                    let refs = session.content.ref_count(key).unwrap_or_default();
                    println!(
                        "{} {} ({} bytes, refs {})",
                        "✓".green(),
                        key.bold(),
                        bytes.len(),
                        refs
                    );
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("{} {}: {}", "✗".red(), key.bold(), err);
            }
        }
    }

    print_stats("Content cache", &session.content.stats(), json)?;

    if failed > 0 {
        anyhow::bail!("{} of {} keys failed to load", failed, keys.len());
    }
    Ok(())
}
