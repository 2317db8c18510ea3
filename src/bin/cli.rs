//! listing-watch CLI
//!
//! Local execution entry point.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use listing_watch::{
    config::{load_config, open_store},
    error::{AppError, Result},
    notify::build_dispatcher,
    page::HttpPageSource,
    pipeline::build_scheduler,
    storage::RecordStore,
    utils::jitter::Pacing,
};
use tokio_util::sync::CancellationToken;

/// listing-watch - classifieds listing watcher
#[derive(Parser, Debug)]
#[command(
    name = "listing-watch",
    version,
    about = "Watches classifieds search pages and emails new listings"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch continuously until interrupted
    Run {
        /// Keep records in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Run a single cycle that records and notifies immediately
    Once {
        /// Keep records in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show record store counts
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    log::warn!("Cannot listen for SIGTERM: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        log::info!("Shutdown requested");
        token.cancel();
    });
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    log::info!("listing-watch starting...");

    match cli.command {
        Command::Run { ephemeral } => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config, &cli.config, ephemeral).await?;
            let dispatcher = build_dispatcher(&config.email)?;
            let pacing = Pacing::from_config(&config.crawler);
            let mut scheduler = build_scheduler(
                &config,
                Arc::new(HttpPageSource::new()),
                store.clone(),
                dispatcher,
                pacing,
            )?;

            let token = CancellationToken::new();
            spawn_signal_handler(token.clone());
            scheduler.run(token).await;
            store.close().await;
        }

        Command::Once { ephemeral } => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config, &cli.config, ephemeral).await?;
            let dispatcher = build_dispatcher(&config.email)?;
            let pacing = Pacing::from_config(&config.crawler);
            let mut scheduler = build_scheduler(
                &config,
                Arc::new(HttpPageSource::new()),
                store.clone(),
                dispatcher,
                pacing,
            )?;

            let token = CancellationToken::new();
            spawn_signal_handler(token.clone());
            let result = scheduler.run_once(&token).await;
            store.close().await;
            let summary = result?;
            if summary.urls_visited == 0 && summary.urls_failed > 0 {
                return Err(AppError::validation("every URL failed"));
            }
        }

        Command::Validate => {
            log::info!("Validating {}...", cli.config.display());
            let config = load_config(&cli.config)?;
            log::info!(
                "Record table: {}",
                config.database.table_name(&cli.config)
            );
            log::info!("All validations passed!");
        }

        Command::Info => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config, &cli.config, false).await?;
            let stats = store.stats().await?;

            log::info!("Database: {}", config.database.url);
            log::info!("Table: {}", config.database.table_name(&cli.config));
            log::info!(
                "Records: {} total, {} notified, {} pending",
                stats.total,
                stats.notified,
                stats.pending
            );
            for record in store.pending().await? {
                log::info!(
                    "{}",
                    record.format("  pending: {title} [{location}, {posted}] {link}")
                );
            }
            store.close().await;
        }
    }

    log::info!("Done!");

    Ok(())
}
