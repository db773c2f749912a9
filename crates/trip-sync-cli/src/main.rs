use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trip_sync::{CacheKey, SyncConfig, TripSync};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tripsync", about = "Inspect and drain the offline trip sync queue")]
struct Cli {
    /// Config file (defaults to ./trip-sync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue length and cached snapshot count
    Status,
    /// Pending mutations
    Queue {
        #[command(subcommand)]
        action: QueueCommands,
    },
    /// Replay the queue against the configured remote once
    Drain,
    /// Cached collection snapshots
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending mutations in replay order
    List,
    /// Drop one pending mutation
    Remove {
        /// Queue entry id
        id: Uuid,
    },
    /// Drop every pending mutation without syncing it
    Clear,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Print one snapshot (e.g. trips_all, days_<trip id>)
    Get { key: String },
    /// List cached snapshot keys
    Keys,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    match path {
        Some(path) => {
            let mut config = SyncConfig::load(path)?;
            config.apply_env_overrides()?;
            Ok(config)
        }
        None => SyncConfig::load_default(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    tracing::debug!(
        "Loaded config (local: {}, remote: {})",
        config.local.url,
        config.remote.url
    );
    let sync = TripSync::open(&config)
        .await
        .context("Failed to open trip sync stores")?;

    match cli.command {
        Commands::Status => status(&sync, &config).await,
        Commands::Queue { action } => match action {
            QueueCommands::List => queue_list(&sync).await,
            QueueCommands::Remove { id } => {
                sync.queue().remove(id).await?;
                println!("{} Removed {}", "✓".green(), id);
                Ok(())
            }
            QueueCommands::Clear => {
                let dropped = sync.queue().len().await?;
                sync.queue().clear().await?;
                println!("{} Dropped {} pending changes", "✓".green(), dropped);
                Ok(())
            }
        },
        Commands::Drain => {
            let summary = sync.coordinator().drain().await?;
            if summary.failed > 0 {
                println!("{} {}", "!".yellow(), summary);
            } else {
                println!("{} {}", "✓".green(), summary);
            }
            Ok(())
        }
        Commands::Cache { action } => match action {
            CacheCommands::Get { key } => cache_get(&sync, key).await,
            CacheCommands::Keys => {
                for key in sync.cache().keys().await? {
                    println!("{}", key);
                }
                Ok(())
            }
        },
    }
}

async fn status(sync: &TripSync, config: &SyncConfig) -> Result<()> {
    let pending = sync.queue().len().await?;
    let cached = sync.cache().keys().await?.len();

    println!("{}", "Trip sync".cyan().bold());
    println!("  {} {}", "Local:".cyan(), config.local.url);
    println!("  {} {}", "Remote:".cyan(), config.remote.url);
    println!("  {} {}", "Pending changes:".cyan(), pending);
    println!("  {} {}", "Cached snapshots:".cyan(), cached);
    Ok(())
}

async fn queue_list(sync: &TripSync) -> Result<()> {
    let entries = sync.queue().list_all().await?;
    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for entry in entries {
        let target = entry
            .mutation
            .target()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {:<8} {:<6} {}",
            entry.id.to_string().dimmed(),
            entry.timestamp.to_rfc3339(),
            entry.mutation.kind().to_string().bold(),
            entry.mutation.table(),
            target
        );
    }
    Ok(())
}

async fn cache_get(sync: &TripSync, key: String) -> Result<()> {
    let key = CacheKey::raw(key);
    let snapshot = sync
        .cache()
        .read_raw(&key)
        .await?
        .with_context(|| format!("No snapshot cached under {}", key))?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
