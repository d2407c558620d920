//! Pixnet gateway binary.
//!
//! Fronts a decentralized pool of generation validators: accepts client
//! requests, forwards them stake-weighted with failover, and keeps the
//! validator registry fresh via background stake sync and health sweeps.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pix_gateway::{HealthMonitor, HttpStakeOracle, HttpValidatorClient, run_stake_sync};
use pix_gateway_server::{AppState, GatewayConfig, GatewayServer};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pix-gateway")]
#[command(about = "Gateway for the Pixnet generation validator pool")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "PIX_BIND_ADDR", default_value = "0.0.0.0:10003")]
    bind: SocketAddr,

    /// Directory for persisted state
    #[arg(long, env = "PIX_STATE_DIR", default_value = "./state")]
    state_dir: PathBuf,

    /// Stake oracle membership URL
    #[arg(long, env = "PIX_ORACLE_URL")]
    oracle_url: String,

    /// Seconds between stake membership refreshes
    #[arg(long, default_value = "300")]
    sync_period: u64,

    /// Seconds between validator health sweeps
    #[arg(long, default_value = "300")]
    probe_period: u64,

    /// Constant added to every stake weight during selection
    #[arg(long, default_value = "1.0")]
    stake_epsilon: f64,

    /// Grant credits to an api key at startup, as KEY=CREDITS (repeatable)
    #[arg(long = "grant", value_name = "KEY=CREDITS")]
    grants: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = GatewayConfig::new(cli.bind)
        .with_state_dir(cli.state_dir)
        .with_oracle_url(cli.oracle_url.clone())
        .with_sync_period(Duration::from_secs(cli.sync_period))
        .with_probe_period(Duration::from_secs(cli.probe_period))
        .with_stake_epsilon(cli.stake_epsilon);

    let state = match AppState::from_config(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    for grant in &cli.grants {
        match grant.split_once('=').and_then(|(key, credits)| {
            credits.parse::<i64>().ok().map(|c| (key.to_string(), c))
        }) {
            Some((key, credits)) => {
                state.ledger.grant(key, credits);
            }
            None => warn!(grant = %grant, "ignoring malformed --grant, expected KEY=CREDITS"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    match HttpStakeOracle::new(&config.oracle_url, config.oracle_timeout) {
        Ok(oracle) => {
            tokio::spawn(run_stake_sync(
                oracle,
                state.stake.clone(),
                Arc::clone(&state.registry),
                config.sync_period,
                shutdown_rx.clone(),
            ));
        }
        Err(e) => {
            error!("cannot build stake oracle client: {e}");
            std::process::exit(1);
        }
    }

    match HttpValidatorClient::new(
        config.connect_timeout,
        config.request_timeout,
        config.probe_timeout,
    ) {
        Ok(probe_client) => {
            let monitor = HealthMonitor::new(
                Arc::clone(&state.registry),
                probe_client,
                config.probe_period,
                state.issuer.public_key_b64().to_string(),
            );
            tokio::spawn(monitor.run(shutdown_rx));
        }
        Err(e) => {
            error!("cannot build probe client: {e}");
            std::process::exit(1);
        }
    }

    info!(addr = %config.bind_addr, oracle = %config.oracle_url, "starting pixnet gateway");

    let server = GatewayServer::new(state);
    let result = server
        .serve_with_shutdown(config.bind_addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutdown signal received");
        })
        .await;

    let _ = shutdown_tx.send(true);

    if let Err(e) = result {
        error!("gateway error: {e}");
        std::process::exit(1);
    }
}
