//! Label command implementation.

use std::path::Path;

use colored::Colorize;
use depot_core::{CacheConfig, ReleaseOutcome};

use super::{Session, print_stats};

/// Execute the label command.
///
/// Loads everything the label resolves to, then releases it again.
pub async fn execute(root: &Path, config: &CacheConfig, label: &str) -> anyhow::Result<()> {
    let session = Session::open(root, config)?;

    let results = session.content.acquire_label::<Vec<u8>>(label).await?;
    println!("{}", format!("Label '{}' resolved to {} resources", label, results.len()).bold());

    let mut failed = 0;
    for (key, result) in &results {
        match result {
            Ok(bytes) => println!("  {} {} ({} bytes)", "✓".green(), key, bytes.len()),
            Err(err) => {
                failed += 1;
                eprintln!("  {} {}: {}", "✗".red(), key, err);
            }
        }
    }

    let released = session
        .content
        .release_label::<Vec<u8>>(label)
        .await?
        .into_iter()
        .filter(|(_, outcome)| *outcome == ReleaseOutcome::Released)
        .count();
    println!("Released {} resources", released);

    print_stats("Content cache", &session.content.stats(), false)?;

    if failed > 0 {
        anyhow::bail!("{} of {} resources under '{}' failed to load", failed, results.len(), label);
    }
    Ok(())
}
