use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use derived_cache::{BackingStore, CacheManager, FileStore, SortBy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::JsonCache;
use config::Config;

#[derive(Parser)]
#[command(name = "dvc")]
#[command(author, version, about = "Derived-value cache inspector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (overrides the configuration file)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Namespace (overrides the configuration file)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache a JSON value under a key
    Put {
        /// Cache key
        key: String,

        /// JSON value
        value: String,

        /// Time to live in seconds
        #[arg(short, long)]
        ttl_secs: Option<u64>,
    },

    /// Print the cached value for a key
    Get {
        /// Cache key
        key: String,
    },

    /// Remove a key
    Delete {
        /// Cache key
        key: String,
    },

    /// Remove every entry of the namespace
    Clear,

    /// Load persisted entries and show statistics
    Stats,

    /// Load persisted entries and list them
    Entries {
        /// Sort order (access, time, size)
        #[arg(long, default_value = "access")]
        sort_by: String,
    },

    /// Print the key a JSON input would be cached under
    DeriveKey {
        /// JSON input
        input: String,

        /// Key prefix
        #[arg(short, long, default_value = "calc")]
        prefix: String,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(store) = cli.store {
        config.store_dir = store;
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }

    // Commands that never touch the store
    match &cli.command {
        Commands::DeriveKey { input, prefix } => return commands::derive_key(prefix, input),
        Commands::InitConfig { path } => {
            config.save(path)?;
            println!(
                "{} Wrote configuration to {}",
                "✓".bright_green(),
                path.display()
            );
            return Ok(());
        }
        _ => {}
    }

    let store = Arc::new(FileStore::open(&config.store_dir).await?);
    tracing::debug!(
        "Opened store {} with namespace '{}'",
        store.root().display(),
        config.namespace
    );
    let backing: Arc<dyn BackingStore> = store.clone();
    let cache: JsonCache = CacheManager::with_store(config.cache_config(), backing);

    let outcome = run(&cli.command, &cache, &store).await;

    cache.flush_persistence().await;
    cache.dispose().await;
    outcome
}

async fn run(command: &Commands, cache: &JsonCache, store: &FileStore) -> Result<()> {
    match command {
        Commands::Put {
            key,
            value,
            ttl_secs,
        } => commands::put(cache, key, value, *ttl_secs).await,
        Commands::Get { key } => commands::get(cache, key).await,
        Commands::Delete { key } => commands::delete(cache, key).await,
        Commands::Clear => commands::clear(cache).await,
        Commands::Stats => commands::stats(cache, store).await,
        Commands::Entries { sort_by } => {
            let sort_by: SortBy = sort_by.parse().map_err(anyhow::Error::msg)?;
            commands::entries(cache, store, sort_by).await
        }
        Commands::DeriveKey { .. } | Commands::InitConfig { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "dvc=debug,derived_cache=debug"
    } else {
        "dvc=info,derived_cache=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
