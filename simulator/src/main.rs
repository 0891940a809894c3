use anyhow::Context;
use clap::Parser;
use staketrade_execution::Tracker;
use staketrade_simulator::{Api, Simulator, SimulatorConfig};
use staketrade_types::{api::StakeRequest, constants::DECIMALS, format_amount};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Load config
    let config: SimulatorConfig = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_yaml::from_str(&raw).context("failed to parse config file")?
        }
        None => SimulatorConfig::default(),
    };
    let mut config = config.validate().context("invalid config")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    // Seed ledger
    let simulator = Arc::new(Simulator::new(config.params));
    for (owner, amount, timestamp) in config.genesis {
        let created = simulator
            .stake(&StakeRequest {
                owner,
                amount,
                timestamp,
            })
            .with_context(|| format!("failed to create genesis stake for {owner}"))?;
        info!(
            %owner,
            index = created.index,
            amount = %format_amount(amount, DECIMALS, 4),
            "created genesis stake"
        );
    }

    // Start tracker
    let tracker = config
        .run_tracker
        .then(|| Tracker::new(simulator.ledger(), config.params).spawn());

    let api = Api::new(simulator, config.rate_limit);
    let app = api.router().context("failed to build router")?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await
    .context("axum server error")?;

    // Let an in-flight pass finish
    if let Some(tracker) = tracker {
        let tracker = tracker.stop().await.context("tracker task failed")?;
        info!(tracked = tracker.tracked().len(), "tracker stopped");
    }

    Ok(())
}
