//! Depot CLI - drive the resource and scene caches against a directory.
//!
//! The `depot` command loads files and scene manifests from a root
//! directory through the caches, printing reference counts and cache
//! statistics as it goes.

mod commands;
mod config;
mod provider;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{label, load, preload, scene};

/// Depot CLI - cache-and-loader for directory-backed resources
#[derive(Parser, Debug)]
#[command(
    name = "depot",
    author,
    version,
    about = "Depot - deduplicated, reference-counted resource loading",
    long_about = "Depot loads content files and scene manifests from a directory through\nreference-counted caches that share in-flight loads and evict the least-referenced entry."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Cache configuration file (defaults to ./depot.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the content cache capacity
    #[arg(long, global = true)]
    max_content: Option<usize>,

    /// Override the scene cache capacity
    #[arg(long, global = true)]
    max_scenes: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load content files by key
    ///
    /// Keys are paths relative to the root. Repeating a key acquires it again
    /// and raises its reference count.
    Load {
        /// Root directory
        root: PathBuf,

        /// Content keys
        #[arg(required = true)]
        keys: Vec<String>,

        /// Print cache statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load content files concurrently as one batch
    Preload {
        /// Root directory
        root: PathBuf,

        /// Content keys
        #[arg(required = true)]
        keys: Vec<String>,

        /// Print cache statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load every file under a label directory, then release them
    Label {
        /// Root directory
        root: PathBuf,

        /// Label (a sub-directory of the root)
        label: String,
    },

    /// Load a scene manifest and its contents, then unload it
    Scene {
        /// Root directory
        root: PathBuf,

        /// Scene key (resolved to scenes/<key>.toml)
        key: String,

        /// Load alongside active scenes instead of replacing them
        #[arg(long)]
        additive: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cache_config =
        config::load_config(args.config.as_deref(), args.max_content, args.max_scenes)?;

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Load { root, keys, json } => {
            load::execute(&root, &cache_config, keys, json).await?;
        }
        Command::Preload { root, keys, json } => {
            preload::execute(&root, &cache_config, keys, json).await?;
        }
        Command::Label { root, label } => {
            label::execute(&root, &cache_config, &label).await?;
        }
        Command::Scene { root, key, additive } => {
            scene::execute(&root, &cache_config, &key, additive).await?;
        }
    }

    Ok(())
}
