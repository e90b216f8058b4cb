//! Block production for the Pebble protocol: template assembly from the
//! chain tip and mempool, and bounded-batch proof-of-work mining.

pub mod miner;

pub use miner::{BlockTemplate, build_template, mine};
