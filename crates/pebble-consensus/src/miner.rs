//! Block template construction and nonce mining.
//!
//! A template is built from the best tip and a fee-rate-ordered mempool
//! selection: the coinbase claims `subsidy(height) + Σ fees` and carries
//! the length-prefixed little-endian block height in its data slot, so
//! coinbases at different heights always have distinct txids.
//!
//! Mining is cooperative: [`mine`] scans a bounded number of nonces and
//! returns, leaving the template positioned to continue. The caller is
//! expected to re-check the best tip between batches and rebuild the
//! template when it moved; a found block re-enters the node through the
//! normal block-acceptance path.

use tracing::debug;

use pebble_core::chain::ChainState;
use pebble_core::constants::MAX_BLOCK_SIZE;
use pebble_core::difficulty;
use pebble_core::hash::Hash256;
use pebble_core::mempool::Mempool;
use pebble_core::merkle;
use pebble_core::reward;
use pebble_core::types::{Block, BlockHeader, OutPoint, Script, Transaction, TxIn, TxOut};

/// Bytes reserved for the header and coinbase when budgeting mempool
/// selection.
const COINBASE_RESERVE: usize = 256;

/// A candidate block plus its assembly metadata.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub height: u32,
    pub total_fees: u64,
}

/// The coinbase data slot: length-prefixed little-endian height, minimal
/// width.
pub fn coinbase_height_data(height: u32) -> Vec<u8> {
    let bytes = height.to_le_bytes();
    let trailing_zeros = bytes.iter().rev().take_while(|b| **b == 0).count();
    let len = (bytes.len() - trailing_zeros).max(1);
    let mut data = Vec::with_capacity(1 + len);
    data.push(len as u8);
    data.extend_from_slice(&bytes[..len]);
    data
}

/// Assemble a block template on top of the current best tip.
///
/// Selects mempool transactions under `MAX_BLOCK_SIZE` minus a coinbase
/// reserve, builds the coinbase paying `miner_script`, and fills the
/// header: previous hash from the tip, bits from retargeting, timestamp at
/// `max(now, median_time_past + 1)`, nonce zero.
pub fn build_template(
    chain: &ChainState,
    mempool: &Mempool,
    miner_script: &Script,
    now: u64,
) -> BlockTemplate {
    let height = chain.height() + 1;
    let selected = mempool.select_for_block(MAX_BLOCK_SIZE - COINBASE_RESERVE, now);
    let total_fees: u64 = selected.iter().map(|(_, fee)| fee).sum();

    let coinbase = Transaction {
        is_coinbase: true,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            signature: coinbase_height_data(height),
            pubkey: vec![],
        }],
        outputs: vec![TxOut {
            value: reward::subsidy(height) + total_fees,
            script: *miner_script,
        }],
    };

    let mut transactions = Vec::with_capacity(1 + selected.len());
    transactions.push(coinbase);
    transactions.extend(selected.into_iter().map(|(tx, _)| tx));

    let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
    let timestamp = now.max(chain.tip_median_time_past() + 1);

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: chain.best_hash(),
            merkle_root: merkle::merkle_root(&txids),
            timestamp,
            bits: chain.next_bits(),
            nonce: 0,
        },
        transactions,
    };

    debug!(
        height,
        txs = block.transactions.len(),
        total_fees,
        bits = block.header.bits,
        "built block template"
    );

    BlockTemplate { block, height, total_fees }
}

/// Scan up to `max_iters` nonces for a proof of work.
///
/// Returns the solved block, or `None` when the batch is exhausted; the
/// template keeps its position so the next call continues the scan. A
/// nonce wrap bumps the timestamp by one second.
pub fn mine(template: &mut BlockTemplate, max_iters: u64) -> Option<Block> {
    let bits = template.block.header.bits;
    for _ in 0..max_iters {
        let header = &mut template.block.header;
        if difficulty::meets_target(&header.hash(), bits) {
            debug!(
                height = template.height,
                nonce = header.nonce,
                hash = %header.hash(),
                "found proof of work"
            );
            return Some(template.block.clone());
        }
        header.nonce = header.nonce.wrapping_add(1);
        if header.nonce == 0 {
            header.timestamp += 1;
        }
    }
    None
}
