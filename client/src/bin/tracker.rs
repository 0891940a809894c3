use anyhow::Context;
use clap::Parser;
use staketrade_client::{Client, TrackerConfig};
use staketrade_execution::Tracker;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs the trade lifecycle tracker against a remote ledger")]
struct Args {
    /// YAML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured ledger URL.
    #[arg(short, long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config
    let mut config: TrackerConfig = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_yaml::from_str(&raw).context("failed to parse config file")?
        }
        None => TrackerConfig::default(),
    };
    if let Some(url) = args.url {
        config.url = url;
    }
    let config = config.validate().context("invalid config")?;

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let client = Client::new(&config.url)
        .with_context(|| format!("invalid ledger url {}", config.url))?
        .with_retry_policy(config.retry_policy);
    info!(
        url = %config.url,
        update_interval = ?config.params.update_interval,
        exit_after = ?config.params.exit_after,
        "starting tracker"
    );
    let handle = Tracker::new(client, config.params).spawn();

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    let tracker = handle.stop().await.context("tracker task failed")?;
    info!(tracked = tracker.tracked().len(), "tracker stopped");
    Ok(())
}
