//! Node entry point: loads config, wires up the consensus core, the RAFT
//! transport, and the HTTP front, then runs until killed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use chatraft::common::{HEARTBEAT_INTERVAL_MS, RPC_TIMEOUT_HEARTBEATS};
use chatraft::config::NodeConfig;
use chatraft::error::ConfigError;
use chatraft::http;
use chatraft::rpc::Transport;
use chatraft::server::Consensus;

#[derive(Parser)]
#[command(about = "A replicated chat log over a RAFT-style consensus engine")]
struct Args {
    /// Path to this node's TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match NodeConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let me = config.me().expect("validated by NodeConfig::load");
    let raft_addr = me.raft_addr;
    let http_addr = me.http_addr;

    let rpc_timeout = Duration::from_millis(config.heartbeat_interval_ms.max(HEARTBEAT_INTERVAL_MS) * RPC_TIMEOUT_HEARTBEATS as u64);
    let consensus = Consensus::new(&config, rpc_timeout);
    consensus.spawn_ticker();

    let transport = Transport::bind(raft_addr)
        .map_err(|source| ConfigError::Bind { role: "raft", addr: raft_addr, source })?;
    info!("{} listening for raft rpcs on {raft_addr}", consensus.id());
    transport.serve(consensus.clone());

    let config = Arc::new(config);
    let app = http::router(consensus, config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|source| ConfigError::Bind { role: "http", addr: http_addr, source })?;
        info!("{http_addr} serving http");
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
