//! Remedica CLI - cache maintenance commands.
//!
//! Operational front door to the cache service: inspect statistics, run a
//! sweep, clear everything, or warm a set of image URLs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use remedica::{CacheService, CacheServiceConfig};

#[derive(Parser)]
#[command(name = "remedica", version, about = "Remedica cache maintenance")]
struct Cli {
    /// Cache root directory (defaults to the platform cache dir).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print entry counts and sizes for the cache.
    Stats,
    /// Run one eviction sweep pass now.
    Sweep,
    /// Wipe the index and payload store entirely.
    Clear,
    /// Best-effort warm the cache for the given image URLs.
    Warm {
        /// Image URLs to prefetch.
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = CacheServiceConfig::default();
    if let Some(dir) = cli.cache_dir {
        config.root_dir = dir;
    }

    let service = match CacheService::start(config, Vec::new()).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Failed to start cache service");
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&cli.command, &service).await;
    service.shutdown();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: &Command, service: &CacheService) -> Result<(), remedica::FetchError> {
    match command {
        Command::Stats => {
            let stats = service.cache_stats();
            println!("entries:     {}", stats.entry_count);
            println!("total bytes: {}", stats.total_bytes);
            if let Some(oldest) = stats.oldest_entry {
                println!("oldest:      {oldest}");
            }
            if let Some(newest) = stats.newest_entry {
                println!("newest:      {newest}");
            }
        }
        Command::Sweep => {
            let stats = service.sweep_now().await?;
            println!("{stats}");
        }
        Command::Clear => {
            service.clear_cache().await?;
            println!("cache cleared");
        }
        Command::Warm { urls } => {
            service.preload(urls).await;
            let stats = service.cache_stats();
            println!("warmed {} urls ({} entries cached)", urls.len(), stats.entry_count);
        }
    }
    Ok(())
}
