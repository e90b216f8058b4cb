//! Transaction and block consensus rules.
//!
//! Two tiers, mirroring what each call site can know:
//!
//! - **Stateless** ([`check_transaction`], [`check_block`]): context-free
//!   structure, size, merkle, and proof-of-work checks. Runs without any
//!   shared state.
//! - **Contextual** ([`validate_transaction`], [`validate_block`]): checks
//!   that need the chain tip and a UTXO view — header linkage, expected
//!   difficulty, timestamps, input resolution (including outputs of earlier
//!   transactions in the same block), maturity, scripts and signatures,
//!   and the coinbase reward bound.
//!
//! Validation never mutates state; applying a validated block to the UTXO
//! set is the chain state's job.

use std::collections::{HashMap, HashSet};

use crate::constants::{
    MAX_BLOCK_SIZE, MAX_COINBASE_DATA, MAX_MONEY, MAX_TIMESTAMP_DRIFT, MAX_TX_SIZE,
};
use crate::crypto;
use crate::difficulty;
use crate::error::{BlockError, CryptoError, TransactionError};
use crate::hash::Hash256;
use crate::merkle;
use crate::reward;
use crate::types::{Block, OutPoint, Transaction, Utxo};

/// Chain context for full block validation, supplied by the chain state
/// for the branch being extended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockContext {
    /// Height of the block being validated.
    pub height: u32,
    /// Required parent header hash.
    pub prev_hash: Hash256,
    /// Required compact bits from retargeting.
    pub expected_bits: u32,
    /// Median timestamp of the last [`MTP_WINDOW`](crate::constants::MTP_WINDOW)
    /// ancestors; the block must be strictly later.
    pub median_time_past: u64,
    /// Wall-clock time for the future-drift bound.
    pub current_time: u64,
}

/// Summary of a successfully validated transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedTransaction {
    pub total_input: u64,
    pub total_output: u64,
    /// `total_input - total_output`, guaranteed non-negative.
    pub fee: u64,
}

/// Summary of a successfully validated block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all non-coinbase fees.
    pub total_fees: u64,
    /// Total value of the coinbase outputs.
    pub coinbase_value: u64,
}

/// Stateless transaction checks.
///
/// - the coinbase flag matches the input shape (exactly one marker input);
/// - at least one output, each valued in `[1, MAX_MONEY]`, sum within
///   `MAX_MONEY`;
/// - canonical size within [`MAX_TX_SIZE`];
/// - coinbase data within [`MAX_COINBASE_DATA`];
/// - non-coinbase: at least one input, no marker prevouts, no duplicate
///   prevouts, well-sized signature and pubkey material.
pub fn check_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.is_coinbase != tx.has_coinbase_shape() {
        return Err(TransactionError::CoinbaseShape);
    }

    if tx.outputs.is_empty() {
        return Err(TransactionError::NoOutputs);
    }
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value == 0 || output.value > MAX_MONEY {
            return Err(TransactionError::OutputRange { index, value: output.value });
        }
    }
    match tx.total_output_value() {
        Some(total) if total <= MAX_MONEY => {}
        _ => return Err(TransactionError::OutputSumRange),
    }

    let size = tx.size();
    if size > MAX_TX_SIZE {
        return Err(TransactionError::Oversized { size, max: MAX_TX_SIZE });
    }

    if tx.is_coinbase {
        let data_len = tx.inputs[0].signature.len();
        if data_len > MAX_COINBASE_DATA {
            return Err(TransactionError::CoinbaseDataTooLarge {
                size: data_len,
                max: MAX_COINBASE_DATA,
            });
        }
        return Ok(());
    }

    if tx.inputs.is_empty() {
        return Err(TransactionError::NoInputs);
    }
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for (index, input) in tx.inputs.iter().enumerate() {
        if input.prevout.is_null() {
            return Err(TransactionError::MarkerPrevout(index));
        }
        if !seen.insert(input.prevout) {
            return Err(TransactionError::DoubleSpendInTx(input.prevout));
        }
        if input.signature.len() != 64 || input.pubkey.len() != 32 {
            return Err(TransactionError::InvalidSignature { index });
        }
    }

    Ok(())
}

/// Stateless block checks.
///
/// - first transaction is the only coinbase;
/// - no duplicate txids;
/// - the header's merkle root matches the computed root;
/// - canonical size within [`MAX_BLOCK_SIZE`];
/// - the header hash meets its own claimed difficulty;
/// - every transaction passes [`check_transaction`].
pub fn check_block(block: &Block) -> Result<(), BlockError> {
    if block.transactions.is_empty() {
        return Err(BlockError::NoCoinbase);
    }
    if !block.transactions[0].is_coinbase {
        return Err(BlockError::FirstTxNotCoinbase);
    }

    for (index, tx) in block.transactions.iter().enumerate() {
        if index > 0 && tx.is_coinbase {
            return Err(BlockError::MultipleCoinbase);
        }
        check_transaction(tx).map_err(|source| BlockError::Tx { index, source })?;
    }

    let mut txids = HashSet::with_capacity(block.transactions.len());
    let mut txid_list = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let txid = tx.txid();
        if !txids.insert(txid) {
            return Err(BlockError::DuplicateTxid(txid));
        }
        txid_list.push(txid);
    }

    if block.header.merkle_root != merkle::merkle_root(&txid_list) {
        return Err(BlockError::MerkleMismatch);
    }

    let size = block.size();
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::Oversized { size, max: MAX_BLOCK_SIZE });
    }

    difficulty::bits_to_target(block.header.bits)?;
    if !difficulty::meets_target(&block.header.hash(), block.header.bits) {
        return Err(BlockError::InvalidPow);
    }

    Ok(())
}

/// Contextual validation of a single non-coinbase transaction.
///
/// Every input must resolve through `view`, be spendable at `height`
/// (coinbase maturity), carry a public key hashing to the referenced
/// script, and a signature verifying over the input's sighash. Returns the
/// computed fee.
pub fn validate_transaction<F>(
    tx: &Transaction,
    view: F,
    height: u32,
) -> Result<ValidatedTransaction, TransactionError>
where
    F: Fn(&OutPoint) -> Option<Utxo>,
{
    if tx.is_coinbase {
        return Err(TransactionError::StandaloneCoinbase);
    }
    check_transaction(tx)?;

    let mut total_input: u64 = 0;
    for (index, input) in tx.inputs.iter().enumerate() {
        let utxo = view(&input.prevout).ok_or(TransactionError::MissingInput(input.prevout))?;

        if !utxo.is_spendable(height) {
            return Err(TransactionError::ImmatureCoinbase {
                height,
                maturity_at: utxo.maturity_height(),
            });
        }

        crypto::verify_input(tx, index, &utxo.output.script).map_err(|e| match e {
            CryptoError::VerificationFailed => TransactionError::ScriptMismatch { index },
            _ => TransactionError::InvalidSignature { index },
        })?;

        total_input = total_input
            .checked_add(utxo.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_output = tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;
    if total_input < total_output {
        return Err(TransactionError::NegativeFee {
            inputs: total_input,
            outputs: total_output,
        });
    }

    Ok(ValidatedTransaction {
        total_input,
        total_output,
        fee: total_input - total_output,
    })
}

/// Contextual validation of a block against the chain state it extends.
///
/// `view` resolves UTXOs from the state **before** this block; outputs of
/// earlier transactions within the block are resolvable by later ones
/// (coinbase outputs included, though maturity makes them unspendable in
/// practice). Performs the stateless checks first, then header linkage,
/// expected difficulty, timestamp bounds, per-transaction contextual
/// validation with in-block double-spend detection, and the coinbase
/// reward bound.
pub fn validate_block<F>(
    block: &Block,
    ctx: &BlockContext,
    view: F,
) -> Result<ValidatedBlock, BlockError>
where
    F: Fn(&OutPoint) -> Option<Utxo>,
{
    check_block(block)?;

    if block.header.prev_hash != ctx.prev_hash {
        return Err(BlockError::PrevHashMismatch);
    }

    if block.header.bits != ctx.expected_bits {
        return Err(BlockError::WrongDifficulty {
            got: block.header.bits,
            expected: ctx.expected_bits,
        });
    }

    if block.header.timestamp <= ctx.median_time_past {
        return Err(BlockError::TimestampTooOld {
            timestamp: block.header.timestamp,
            median_time_past: ctx.median_time_past,
        });
    }
    let limit = ctx.current_time.saturating_add(MAX_TIMESTAMP_DRIFT);
    if block.header.timestamp > limit {
        return Err(BlockError::TimestampTooFar {
            timestamp: block.header.timestamp,
            limit,
        });
    }

    // Outputs created by earlier transactions in this block, available to
    // later ones.
    let mut block_created: HashMap<OutPoint, Utxo> = HashMap::new();
    let mut block_spent: HashSet<OutPoint> = HashSet::new();
    let mut total_fees: u64 = 0;

    let coinbase = &block.transactions[0];
    let coinbase_txid = coinbase.txid();
    for (index, output) in coinbase.outputs.iter().enumerate() {
        block_created.insert(
            OutPoint { txid: coinbase_txid, index: index as u32 },
            Utxo { output: *output, height: ctx.height, is_coinbase: true },
        );
    }

    for (index, tx) in block.transactions.iter().enumerate().skip(1) {
        for input in &tx.inputs {
            if !block_spent.insert(input.prevout) {
                return Err(BlockError::DoubleSpend(input.prevout));
            }
        }

        let resolve = |op: &OutPoint| block_created.get(op).copied().or_else(|| view(op));
        let validated = validate_transaction(tx, resolve, ctx.height)
            .map_err(|source| BlockError::Tx { index, source })?;

        total_fees = total_fees
            .checked_add(validated.fee)
            .ok_or(BlockError::Tx { index, source: TransactionError::ValueOverflow })?;

        let txid = tx.txid();
        for (out_index, output) in tx.outputs.iter().enumerate() {
            block_created.insert(
                OutPoint { txid, index: out_index as u32 },
                Utxo { output: *output, height: ctx.height, is_coinbase: false },
            );
        }
    }

    let coinbase_value = coinbase
        .total_output_value()
        .ok_or(BlockError::Tx { index: 0, source: TransactionError::ValueOverflow })?;
    let max_reward = reward::subsidy(ctx.height)
        .checked_add(total_fees)
        .ok_or(BlockError::Tx { index: 0, source: TransactionError::ValueOverflow })?;
    if coinbase_value > max_reward {
        return Err(BlockError::ExcessiveReward { got: coinbase_value, max: max_reward });
    }

    Ok(ValidatedBlock { total_fees, coinbase_value })
}
