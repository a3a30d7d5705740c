/// media-sync - Main Entry Point
///
/// Downloads media files listed in published manifests into flat local
/// folders, refreshes expired Discord links, and manages the systemd timer
/// that runs the sync daily.
mod discord;
mod disk;
mod format;
mod http;
mod refresh;
mod service;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use media_sync_shared::config::SyncConfig;
use media_sync_shared::models::MediaType;
use media_sync_shared::retry::RetryPolicy;

use crate::disk::FilesystemSpace;
use crate::http::HttpFetcher;
use crate::refresh::RefreshOptions;
use crate::sync::SyncOptions;

#[derive(Parser)]
#[command(
    name = "media-sync",
    version,
    about = "Download media from published manifests",
    after_help = "Environment:
  INSTALL_DIR          Installation directory (default: ~/ai-news-media)
  MIN_FREE_SPACE_MB    Minimum free disk space in MB (default: 500)
  MEDIA_SYNC_SOURCES   Comma-separated manifest sources (default: elizaos,hyperfy)
  DISCORD_TOKEN        Bot token for refreshing expired URLs

Exit codes:
  0  Success
  1  Download failures or insufficient disk space at start
  2  Stopped mid-sync due to low disk space"
)]
struct Cli {
    /// Log skipped files and other per-item detail.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download media from manifests.
    Sync {
        /// Show what would be downloaded.
        #[arg(long)]
        dry_run: bool,

        /// Minimum free disk space in MB (default: MIN_FREE_SPACE_MB or 500).
        #[arg(long, value_name = "MB")]
        min_free: Option<u64>,
    },

    /// Install systemd service and timer.
    Setup,

    /// Show disk usage, timer status and recent logs.
    Status,

    /// Remove systemd service and timer.
    Uninstall,

    /// Refresh expired URLs via the Discord API and download.
    Refresh {
        /// Path to manifest JSON file.
        manifest: PathBuf,

        /// Output directory for downloads.
        #[arg(short, long, default_value = "./media")]
        output: PathBuf,

        /// Only files posted by this user ID.
        #[arg(long)]
        user: Option<String>,

        /// Only files of this media type.
        #[arg(long = "type", value_enum)]
        media_type: Option<MediaType>,

        /// Show what would be downloaded.
        #[arg(long)]
        dry_run: bool,

        /// Re-download even if the file exists.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SyncConfig::from_env()?;
    let fetcher = HttpFetcher::new(config.user_agent.clone(), RetryPolicy::default())?;

    let code = match cli.command {
        Commands::Sync { dry_run, min_free } => {
            let opts = SyncOptions {
                dry_run,
                min_free_mb: min_free.unwrap_or(config.min_free_mb),
            };
            sync::sync(&config, &fetcher, &FilesystemSpace, &opts)
                .await?
                .exit_code()
        }
        Commands::Setup => service::setup(&config).await?,
        Commands::Status => service::status(&config).await?,
        Commands::Uninstall => service::uninstall().await?,
        Commands::Refresh {
            manifest,
            output,
            user,
            media_type,
            dry_run,
            force,
        } => {
            let opts = RefreshOptions {
                manifest,
                output,
                user,
                media_type,
                dry_run,
                force,
            };
            refresh::run(&config, &fetcher, &opts).await?
        }
    };

    info!("Exiting with code {}", code);
    Ok(ExitCode::from(code))
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter = format!("media_sync={},media_sync_shared={}", level, level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .init();
}
