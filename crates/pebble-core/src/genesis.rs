//! Deterministic genesis block construction.
//!
//! The genesis block is height 0: a single coinbase paying the full initial
//! subsidy to the network's genesis script (an unspendable burn script by
//! default), with the genesis message embedded in the coinbase input's data
//! slot. Every node on a network derives the identical block from its
//! [`ChainParams`], so the genesis hash doubles as a network identifier.
//!
//! Genesis is the root ancestor: it is connected unconditionally by
//! [`ChainState::new`](crate::chain::ChainState::new) and never validated
//! through the normal block path (its header carries the proof-of-work
//! floor but no mined nonce).

use crate::constants::ChainParams;
use crate::hash::Hash256;
use crate::merkle;
use crate::reward;
use crate::types::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};

/// Message embedded in the genesis coinbase.
pub const GENESIS_MESSAGE: &[u8] = b"A pebble dropped in still water, 2026.";

/// Build the genesis coinbase for the given parameters.
fn genesis_coinbase(params: &ChainParams) -> Transaction {
    Transaction {
        is_coinbase: true,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            signature: GENESIS_MESSAGE.to_vec(),
            pubkey: vec![],
        }],
        outputs: vec![TxOut {
            value: reward::subsidy(0),
            script: params.genesis_script,
        }],
    }
}

/// Build the genesis block for the given parameters.
pub fn genesis_block(params: &ChainParams) -> Block {
    let coinbase = genesis_coinbase(params);
    let merkle_root = merkle::merkle_root(&[coinbase.txid()]);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root,
            timestamp: params.genesis_timestamp,
            bits: params.pow_limit_bits,
            nonce: 0,
        },
        transactions: vec![coinbase],
    }
}

/// The genesis block hash for the given parameters.
pub fn genesis_hash(params: &ChainParams) -> Hash256 {
    genesis_block(params).header.hash()
}

/// Whether `block` is the genesis block of the given parameters.
pub fn is_genesis(params: &ChainParams, block: &Block) -> bool {
    block.header.hash() == genesis_hash(params)
}
