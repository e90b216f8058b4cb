//! Builders for hand-crafted regtest chains.
//!
//! Everything here goes through the real consensus paths: blocks are mined
//! against the regtest proof-of-work floor and submitted via
//! `ChainState::accept_block`, so the fixtures exercise the same code a
//! live node runs.

use pebble_core::chain::ChainState;
use pebble_core::constants::ChainParams;
use pebble_core::crypto::{self, KeyPair};
use pebble_core::difficulty;
use pebble_core::hash::Hash256;
use pebble_core::merkle;
use pebble_core::reward;
use pebble_core::types::{Block, BlockHeader, OutPoint, Script, Transaction, TxIn, TxOut};

/// A stable "wall clock" comfortably past every network's genesis.
pub const NOW: u64 = 1_767_235_602;

pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes([seed; 32])
}

pub fn script(seed: u8) -> Script {
    Script([seed; 20])
}

pub fn regtest_chain() -> ChainState {
    ChainState::new(ChainParams::regtest())
}

/// A coinbase claiming exactly the height's subsidy, salted for a unique
/// txid.
pub fn coinbase(height: u32, to: Script, salt: u64) -> Transaction {
    let mut data = height.to_le_bytes().to_vec();
    data.extend_from_slice(&salt.to_le_bytes());
    Transaction {
        is_coinbase: true,
        inputs: vec![TxIn { prevout: OutPoint::null(), signature: data, pubkey: vec![] }],
        outputs: vec![TxOut { value: reward::subsidy(height), script: to }],
    }
}

/// Build and sign a spend of `prevouts`, all owned by `kp`.
pub fn signed_spend(
    kp: &KeyPair,
    prevouts: &[OutPoint],
    outputs: &[(u64, Script)],
) -> Transaction {
    let mut tx = Transaction {
        is_coinbase: false,
        inputs: prevouts
            .iter()
            .map(|op| TxIn { prevout: *op, signature: vec![], pubkey: vec![] })
            .collect(),
        outputs: outputs
            .iter()
            .map(|&(value, script)| TxOut { value, script })
            .collect(),
    };
    for i in 0..tx.inputs.len() {
        crypto::sign_input(&mut tx, i, kp).expect("test key signs");
    }
    tx
}

/// Assemble and mine a valid child of `parent_hash`.
///
/// The coinbase pays `miner` the plain subsidy (any fees in `txs` are
/// forfeited, which consensus allows). `timestamp` defaults to one second
/// past the later of the parent timestamp and the median time past.
pub fn build_child(
    chain: &ChainState,
    parent_hash: Hash256,
    miner: Script,
    txs: Vec<Transaction>,
    timestamp: Option<u64>,
    salt: u64,
) -> Block {
    let parent = chain.entry(&parent_hash).expect("parent must be indexed");
    let height = parent.height + 1;
    let bits = chain
        .expected_bits_for_child(&parent_hash)
        .expect("parent must be indexed");
    let mtp = chain
        .median_time_past_for_child(&parent_hash)
        .expect("parent must be indexed");

    let mut transactions = vec![coinbase(height, miner, salt)];
    transactions.extend(txs);
    let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();

    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: parent_hash,
            merkle_root: merkle::merkle_root(&txids),
            timestamp: timestamp
                .unwrap_or_else(|| mtp.max(parent.block.header.timestamp) + 1),
            bits,
            nonce: 0,
        },
        transactions,
    };
    mine_in_place(&mut block);
    block
}

/// Grind the nonce until the header meets its own bits.
pub fn mine_in_place(block: &mut Block) {
    while !difficulty::meets_target(&block.header.hash(), block.header.bits) {
        block.header.nonce += 1;
    }
}

/// Extend the best chain by `n` empty blocks mined to `miner`.
pub fn extend_chain(chain: &mut ChainState, n: u32, miner: Script) -> Vec<Hash256> {
    let mut hashes = Vec::with_capacity(n as usize);
    for i in 0..n {
        let block = build_child(chain, chain.best_hash(), miner, vec![], None, i as u64);
        let accepted = chain.accept_block(block, NOW).expect("extension connects");
        assert!(accepted.is_connected());
        hashes.push(accepted.hash());
    }
    hashes
}

/// The outpoint of a block's coinbase output 0.
pub fn coinbase_outpoint(block: &Block) -> OutPoint {
    OutPoint { txid: block.transactions[0].txid(), index: 0 }
}
