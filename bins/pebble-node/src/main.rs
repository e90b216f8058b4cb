//! Pebble full node binary.
//!
//! Starts the core with flat-file snapshot persistence and the JSON-RPC
//! server, optionally mining to a configured address. Configuration
//! precedence: defaults for the selected network, then environment
//! variables, then CLI flags.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};

use pebble_core::constants::NetworkType;
use pebble_core::types::Script;
use pebble_node_lib::p2p::NullSink;
use pebble_node_lib::{Node, NodeConfig, start_rpc_server};

/// Pebble full node.
#[derive(Parser, Debug)]
#[command(name = "pebble-node", version, about = "Pebble full node with JSON-RPC server")]
struct Args {
    /// Data directory for chain state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// P2P listen port (forwarded to the transport)
    #[arg(long)]
    p2p_port: Option<u16>,

    /// Seed nodes for the transport (comma-separated)
    #[arg(long, value_delimiter = ',')]
    seed_nodes: Vec<String>,

    /// Enable the built-in mining loop
    #[arg(long)]
    mine: bool,

    /// Address payload (40 hex chars) mined coinbases pay to
    #[arg(long)]
    miner_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Connect to the public test network
    #[arg(long, conflicts_with = "regtest")]
    testnet: bool,

    /// Run in local regression-test mode
    #[arg(long, conflicts_with = "testnet")]
    regtest: bool,
}

impl Args {
    fn into_config(self) -> Result<(NodeConfig, String), String> {
        let network = if self.regtest {
            NetworkType::Regtest
        } else if self.testnet {
            NetworkType::Testnet
        } else {
            NetworkType::Mainnet
        };

        let mut config = NodeConfig::for_network(network);
        config.apply_env();

        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(port) = self.p2p_port {
            config.p2p_port = port;
        }
        if !self.seed_nodes.is_empty() {
            config.seed_nodes = self.seed_nodes;
        }
        if self.mine {
            config.enable_mining = true;
        }
        if let Some(addr) = self.miner_address {
            let script = Script::from_hex(&addr)
                .map_err(|e| format!("invalid --miner-address: {e}"))?;
            config.miner_address = Some(script);
        }
        if config.enable_mining && config.miner_address.is_none() {
            return Err("mining enabled but no miner address given".into());
        }
        config.log_level = self.log_level;

        Ok((config, self.log_format))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, log_format) = match args.into_config() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(2);
        }
    };

    init_logging(&config.log_level, &log_format);

    info!("Pebble node v{}", env!("CARGO_PKG_VERSION"));
    info!("network: {}", config.network);
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("mining: {}", config.enable_mining);

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data dir: {e}");
        process::exit(1);
    }

    // The wire transport is plugged in here; without one, the node runs
    // standalone and announcements go nowhere.
    let node = match Node::open(config.clone(), Box::new(NullSink)) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to open node: {e}");
            process::exit(1);
        }
    };
    info!(height = node.block_count(), tip = %node.best_block_hash(), "node ready");

    let rpc_handle = match start_rpc_server(&config.rpc_addr(), node.clone()).await {
        Ok(handle) => {
            info!("RPC server listening on {}", config.rpc_addr());
            handle
        }
        Err(e) => {
            error!("failed to start RPC server: {e}");
            process::exit(1);
        }
    };

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
    };

    tokio::select! {
        _ = node.clone().run() => {
            info!("node loops exited");
        }
        _ = shutdown_signal => {}
    }

    node.shutdown();
    rpc_handle.stop().ok();
    info!("shutdown complete");
}

/// Initialize the tracing subscriber; "json" selects structured output.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
