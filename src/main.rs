//! Tuna Miner - Main Application
//!
//! Connects to a Stratum-style pool and mines the jobs it sends.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tuna_miner::{
    config::Config,
    stratum::Connection,
    utils::init_logging,
    worker::create_strategy,
    Miner, MinerConfig, Result, APP_NAME, APP_VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().await?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(config.log_level, config.log_format, config.log_file.as_deref())?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        address = config.address.as_deref().unwrap_or_default(),
        worker = %config.worker,
        difficulty = config.difficulty,
        strategy = %config.strategy,
        loops = config.loops,
        "Configuration"
    );

    let result = run(config).await;
    if let Err(e) = &result {
        error!(error = %e, category = e.category(), "Miner stopped");
    }
    result
}

async fn run(config: Config) -> Result<()> {
    let strategy = create_strategy(&config)?;
    let (host, port) = config.pool_endpoint()?;

    let connection = Arc::new(Connection::connect(&host, port, config.connection_config()).await?);
    info!(session = %connection.session_id(), "Connected to {}:{}", host, port);

    connection.subscribe().await?;
    connection.authorize().await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            signal_token.cancel();
        }
    });

    let mut miner = Miner::new(
        Arc::clone(&connection),
        strategy,
        MinerConfig::from_config(&config),
        shutdown,
    );
    let result = miner.run().await;

    connection.shutdown().await;
    info!(
        submissions = miner.stats().submissions,
        accepted = miner.stats().accepted,
        rejected = miner.stats().rejected,
        "Disconnected"
    );
    result
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
