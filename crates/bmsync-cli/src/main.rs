use std::path::PathBuf;
use std::process::ExitCode;

use bmsync_sync::{SyncConfig, SyncError, SyncRunSummary};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bmsync")]
#[command(about = "Import bookmark feed entries as Podio items, skipping ones already imported")]
struct Cli {
    /// YAML configuration file (defaults to ./bmsync.yaml when present).
    #[arg(long, global = true, env = "BMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read the feed once and create missing items.
    Sync,
    /// Validate configuration without contacting any service.
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bmsync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The sync has already succeeded here, so a JSON failure falls back to the
/// plain line instead of failing the run.
fn render_summary(summary: &SyncRunSummary, json: bool) -> String {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(rendered) => return rendered,
            Err(err) => warn!(error = %err, "could not render summary as json"),
        }
    }
    format!(
        "sync complete: run_id={} app={} read={} created={} skipped={}",
        summary.run_id,
        summary.app_id,
        summary.bookmarks_read,
        summary.import.created,
        summary.import.skipped
    )
}

async fn run(cli: Cli) -> Result<(), SyncError> {
    let config = SyncConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = bmsync_sync::run_sync_once(config).await?;
            println!("{}", render_summary(&summary, cli.json));
        }
        Commands::CheckConfig => {
            println!(
                "config ok: feed={} app={} endpoint={}",
                config.feed_url, config.app_id, config.podio.endpoint
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err.kind();
            debug!(?kind, "sync failed");
            eprintln!("error: {:#}", anyhow::Error::new(err));
            ExitCode::from(kind.exit_code())
        }
    }
}
