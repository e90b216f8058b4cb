//! Protocol constants and per-network chain parameters.
//!
//! All monetary values are in sats (1 PBL = 10^8 sats). Values fixed by the
//! protocol live here as plain constants; values that differ per network
//! (proof-of-work floor, retarget cadence, ports) live in [`ChainParams`].

use std::fmt;
use std::str::FromStr;

use crate::retarget::RetargetAlgorithm;
use crate::types::Script;

pub const COIN: u64 = 100_000_000;

/// Hard cap on total issuance, matching the halving schedule's limit.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

pub const INITIAL_SUBSIDY: u64 = 50 * COIN;
pub const HALVING_INTERVAL: u32 = 210_000;

/// Maximum canonical block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;
/// Maximum canonical transaction size in bytes.
pub const MAX_TX_SIZE: usize = 100_000;
/// Confirmations before a coinbase output becomes spendable.
pub const COINBASE_MATURITY: u32 = 100;
/// Upper bound on how far a block timestamp may sit in the future.
pub const MAX_TIMESTAMP_DRIFT: u64 = 2 * 3600;
/// Number of ancestor timestamps in the median-time-past window.
pub const MTP_WINDOW: usize = 11;
/// Maximum bytes of arbitrary data in a coinbase input's signature slot.
pub const MAX_COINBASE_DATA: usize = 100;
/// Minimum relay fee rate in sats per byte.
pub const MIN_FEE_RATE: u64 = 1;
/// Seconds after which an unconfirmed transaction expires from the mempool.
pub const MEMPOOL_TTL_SECS: u64 = 14 * 24 * 3600;

/// Which Pebble network a node participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkType {
    /// Subdirectory under the data dir for this network's state.
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Regtest => "regtest",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.data_dir_suffix())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Consensus parameters that vary per network.
///
/// Every node on a network must run identical parameters; they feed directly
/// into difficulty retargeting and genesis construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainParams {
    pub network: NetworkType,
    /// Easiest allowed difficulty, in compact-bits form.
    pub pow_limit_bits: u32,
    /// Difficulty adjusts every this many blocks.
    pub retarget_interval: u32,
    /// Target seconds between blocks.
    pub target_block_time: u64,
    /// Retargeting algorithm; all nodes must agree.
    pub retarget_algorithm: RetargetAlgorithm,
    /// Timestamp of the genesis block.
    pub genesis_timestamp: u64,
    /// Script paid by the genesis coinbase.
    pub genesis_script: Script,
    pub p2p_port: u16,
    pub rpc_port: u16,
}

impl ChainParams {
    pub fn for_network(network: NetworkType) -> Self {
        match network {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Regtest => Self::regtest(),
        }
    }

    pub fn mainnet() -> Self {
        Self {
            network: NetworkType::Mainnet,
            pow_limit_bits: 0x1d00_ffff,
            retarget_interval: 2016,
            target_block_time: 600,
            retarget_algorithm: RetargetAlgorithm::Basic,
            // 2026-01-01 00:00:00 UTC.
            genesis_timestamp: 1_767_225_600,
            genesis_script: Script::burn(),
            p2p_port: 9333,
            rpc_port: 9332,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: NetworkType::Testnet,
            pow_limit_bits: 0x1e00_ffff,
            retarget_interval: 360,
            target_block_time: 60,
            retarget_algorithm: RetargetAlgorithm::Basic,
            genesis_timestamp: 1_767_225_601,
            genesis_script: Script::burn(),
            p2p_port: 19333,
            rpc_port: 19332,
        }
    }

    /// Local regression-test parameters: minimal difficulty and a short
    /// retarget window so tests exercise real retargets quickly.
    pub fn regtest() -> Self {
        Self {
            network: NetworkType::Regtest,
            pow_limit_bits: 0x207f_ffff,
            retarget_interval: 8,
            target_block_time: 1,
            retarget_algorithm: RetargetAlgorithm::Basic,
            genesis_timestamp: 1_767_225_602,
            genesis_script: Script::burn(),
            p2p_port: 29333,
            rpc_port: 29332,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supply_math() {
        assert_eq!(INITIAL_SUBSIDY * HALVING_INTERVAL as u64 * 2, MAX_MONEY);
    }

    #[test]
    fn network_round_trips_through_str() {
        for n in [NetworkType::Mainnet, NetworkType::Testnet, NetworkType::Regtest] {
            assert_eq!(n.to_string().parse::<NetworkType>().unwrap(), n);
        }
        assert!("lunanet".parse::<NetworkType>().is_err());
    }

    #[test]
    fn for_network_selects_matching_params() {
        for n in [NetworkType::Mainnet, NetworkType::Testnet, NetworkType::Regtest] {
            assert_eq!(ChainParams::for_network(n).network, n);
        }
    }

    #[test]
    fn networks_have_distinct_genesis_timestamps() {
        let ts: Vec<u64> = [
            ChainParams::mainnet(),
            ChainParams::testnet(),
            ChainParams::regtest(),
        ]
        .iter()
        .map(|p| p.genesis_timestamp)
        .collect();
        assert_ne!(ts[0], ts[1]);
        assert_ne!(ts[1], ts[2]);
    }

    #[test]
    fn regtest_retargets_quickly() {
        let p = ChainParams::regtest();
        assert!(p.retarget_interval <= 16);
        assert_eq!(p.target_block_time, 1);
    }
}
