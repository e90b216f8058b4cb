//! Node configuration.
//!
//! Defaults come from the selected network's [`ChainParams`]; every field
//! can be overridden programmatically, by environment variable
//! ([`apply_env`](NodeConfig::apply_env)), or by CLI flags in the node
//! binary. Recognized environment variables: `NETWORK`, `DATA_DIR`,
//! `RPC_PORT`, `P2P_PORT`, `MAX_CONNECTIONS`, `SEED_NODES`,
//! `ENABLE_MINING`, `MINER_ADDRESS`.

use std::env;
use std::path::PathBuf;

use pebble_core::constants::{ChainParams, NetworkType};
use pebble_core::types::Script;

/// Configuration for a full node instance.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub network: NetworkType,
    /// Root directory for persistent state.
    pub data_dir: PathBuf,
    /// Bind address for the JSON-RPC server.
    pub rpc_bind: String,
    pub rpc_port: u16,
    /// Transport bindings; opaque to the core.
    pub p2p_port: u16,
    pub max_connections: usize,
    pub seed_nodes: Vec<String>,
    /// Run the built-in mining loop.
    pub enable_mining: bool,
    /// Script mined coinbases pay to; required when mining is enabled.
    pub miner_address: Option<Script>,
    /// Snapshot the chain state every this many connected blocks.
    pub snapshot_interval: u64,
    /// Seconds between housekeeping passes (TTL prune, snapshot).
    pub housekeeping_secs: u64,
    /// Log level filter string (e.g. "info", "pebble_node=debug").
    pub log_level: String,
}

impl NodeConfig {
    pub fn for_network(network: NetworkType) -> Self {
        let params = ChainParams::for_network(network);
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pebble")
            .join(network.data_dir_suffix());

        Self {
            network,
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: params.rpc_port,
            p2p_port: params.p2p_port,
            max_connections: 32,
            seed_nodes: Vec::new(),
            enable_mining: false,
            miner_address: None,
            snapshot_interval: 16,
            housekeeping_secs: 30,
            log_level: "info".to_string(),
        }
    }

    /// Build a config from the environment alone: `NETWORK` selects the
    /// base parameters, then the remaining variables override.
    pub fn from_env() -> Self {
        let network = env::var("NETWORK")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(NetworkType::Mainnet);
        let mut config = Self::for_network(network);
        config.apply_env();
        config
    }

    /// Override fields from environment variables. Unparseable values are
    /// ignored, keeping the previous setting.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = env_parse::<u16>("RPC_PORT") {
            self.rpc_port = port;
        }
        if let Some(port) = env_parse::<u16>("P2P_PORT") {
            self.p2p_port = port;
        }
        if let Some(max) = env_parse::<usize>("MAX_CONNECTIONS") {
            self.max_connections = max;
        }
        if let Ok(seeds) = env::var("SEED_NODES") {
            self.seed_nodes = seeds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(flag) = env::var("ENABLE_MINING") {
            self.enable_mining = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(addr) = env::var("MINER_ADDRESS") {
            if let Ok(script) = Script::from_hex(&addr) {
                self.miner_address = Some(script);
            }
        }
    }

    /// Consensus parameters for the configured network.
    pub fn params(&self) -> ChainParams {
        ChainParams::for_network(self.network)
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    /// Directory holding `index.dat`, `utxo.dat`, and `tip`.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("chainstate")
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.parse().ok()
}
