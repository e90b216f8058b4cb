//! Adversarial block and transaction submissions: every case must be
//! rejected with the right error and leave node state untouched.

use pebble_core::constants::{COIN, COINBASE_MATURITY, MAX_BLOCK_SIZE};
use pebble_core::error::{BlockError, ChainError, TransactionError};
use pebble_core::hash::Hash256;
use pebble_core::merkle;
use pebble_core::reward;
use pebble_core::types::{OutPoint, Transaction, TxIn, TxOut};

use pebble_tests::helpers::*;

/// A structurally valid transaction padded close to `target_size` bytes
/// with dust outputs. Its inputs need not resolve; stateless checks run
/// before contextual ones.
fn bulky_tx(seed: u8, target_size: usize) -> Transaction {
    let base = Transaction {
        is_coinbase: false,
        inputs: vec![TxIn {
            prevout: OutPoint { txid: Hash256([seed; 32]), index: 0 },
            signature: vec![0; 64],
            pubkey: vec![0; 32],
        }],
        outputs: vec![],
    };
    let per_output = 29; // u64 value + varint + 20-byte script
    let count = target_size.saturating_sub(base.size()) / per_output;
    let mut tx = base;
    tx.outputs = (0..count)
        .map(|i| TxOut { value: 1 + i as u64, script: script(seed) })
        .collect();
    tx
}

fn rebuild_merkle_and_mine(block: &mut pebble_core::types::Block) {
    let txids: Vec<Hash256> = block.transactions.iter().map(Transaction::txid).collect();
    block.header.merkle_root = merkle::merkle_root(&txids);
    mine_in_place(block);
}

// ----------------------------------------------------------------------
// Stateless rejections
// ----------------------------------------------------------------------

#[test]
fn oversized_block_rejected() {
    let mut chain = regtest_chain();
    let mut block = build_child(&chain, chain.best_hash(), script(1), vec![], None, 0);
    for seed in 0..12u8 {
        block.transactions.push(bulky_tx(seed, 90_000));
    }
    rebuild_merkle_and_mine(&mut block);
    assert!(block.size() > MAX_BLOCK_SIZE);

    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::Block(BlockError::Oversized { .. })
    ));
    assert_eq!(chain.height(), 0);
}

#[test]
fn tampered_merkle_root_rejected() {
    let mut chain = regtest_chain();
    let mut block = build_child(&chain, chain.best_hash(), script(1), vec![], None, 0);
    block.header.merkle_root = Hash256([0xBE; 32]);
    mine_in_place(&mut block);

    assert!(matches!(
        chain.accept_block(block, NOW),
        Err(ChainError::Block(BlockError::MerkleMismatch))
    ));
}

#[test]
fn unmined_block_fails_pow() {
    let mut chain = regtest_chain();
    let mut block = build_child(&chain, chain.best_hash(), script(1), vec![], None, 0);
    // Claim a far harder target than the block was mined for.
    block.header.bits = 0x2000_0001;

    assert!(matches!(
        chain.accept_block(block, NOW),
        Err(ChainError::Block(BlockError::InvalidPow))
    ));
}

#[test]
fn double_coinbase_rejected() {
    let mut chain = regtest_chain();
    let mut block = build_child(&chain, chain.best_hash(), script(1), vec![], None, 0);
    block.transactions.push(coinbase(1, script(2), 99));
    rebuild_merkle_and_mine(&mut block);

    assert!(matches!(
        chain.accept_block(block, NOW),
        Err(ChainError::Block(BlockError::MultipleCoinbase))
    ));
}

#[test]
fn duplicate_txid_in_block_rejected() {
    let mut chain = regtest_chain();
    extend_chain(&mut chain, 1, keypair(1).script());
    extend_chain(&mut chain, COINBASE_MATURITY, script(0xFF));

    let funded = chain.entry_by_height(1).unwrap().block.clone();
    let op = coinbase_outpoint(&funded);
    let pay = signed_spend(&keypair(1), &[op], &[(50 * COIN - 1_000, script(2))]);

    let mut block =
        build_child(&chain, chain.best_hash(), script(1), vec![pay.clone(), pay], None, 0);
    rebuild_merkle_and_mine(&mut block);

    assert!(matches!(
        chain.accept_block(block, NOW),
        Err(ChainError::Block(BlockError::DuplicateTxid(_)))
    ));
}

// ----------------------------------------------------------------------
// Contextual rejections
// ----------------------------------------------------------------------

#[test]
fn reward_inflation_rejected() {
    let mut chain = regtest_chain();
    let mut block = build_child(&chain, chain.best_hash(), script(1), vec![], None, 0);
    // One sat over subsidy with no fees to cover it.
    block.transactions[0].outputs[0].value = reward::subsidy(1) + 1;
    rebuild_merkle_and_mine(&mut block);

    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::ReorgAborted { cause: BlockError::ExcessiveReward { .. }, .. }
    ));
    assert_eq!(chain.height(), 0);
}

#[test]
fn in_block_double_spend_rejected() {
    let mut chain = regtest_chain();
    extend_chain(&mut chain, 1, keypair(1).script());
    extend_chain(&mut chain, COINBASE_MATURITY, script(0xFF));

    let funded = chain.entry_by_height(1).unwrap().block.clone();
    let op = coinbase_outpoint(&funded);
    let spend_a = signed_spend(&keypair(1), &[op], &[(50 * COIN - 1_000, script(2))]);
    let spend_b = signed_spend(&keypair(1), &[op], &[(50 * COIN - 2_000, script(3))]);

    let block =
        build_child(&chain, chain.best_hash(), script(1), vec![spend_a, spend_b], None, 0);
    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::ReorgAborted { cause: BlockError::DoubleSpend(spent), .. } if spent == op
    ));
}

#[test]
fn stolen_output_rejected() {
    let mut chain = regtest_chain();
    extend_chain(&mut chain, 1, keypair(1).script());
    extend_chain(&mut chain, COINBASE_MATURITY, script(0xFF));

    let funded = chain.entry_by_height(1).unwrap().block.clone();
    let op = coinbase_outpoint(&funded);
    // Signed by a key that does not own the output.
    let theft = signed_spend(&keypair(9), &[op], &[(50 * COIN, keypair(9).script())]);

    let block = build_child(&chain, chain.best_hash(), script(1), vec![theft], None, 0);
    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::ReorgAborted {
            cause: BlockError::Tx { source: TransactionError::ScriptMismatch { .. }, .. },
            ..
        }
    ));
}

#[test]
fn phantom_input_rejected() {
    let mut chain = regtest_chain();
    let ghost = OutPoint { txid: Hash256([0x66; 32]), index: 0 };
    let phantom = signed_spend(&keypair(1), &[ghost], &[(COIN, script(2))]);

    let block = build_child(&chain, chain.best_hash(), script(1), vec![phantom], None, 0);
    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::ReorgAborted {
            cause: BlockError::Tx { source: TransactionError::MissingInput(_), .. },
            ..
        }
    ));
}

#[test]
fn immature_coinbase_spend_in_block_rejected() {
    let mut chain = regtest_chain();
    extend_chain(&mut chain, 1, keypair(1).script());
    // Only 10 confirmations — far short of maturity.
    extend_chain(&mut chain, 10, script(0xFF));

    let funded = chain.entry_by_height(1).unwrap().block.clone();
    let op = coinbase_outpoint(&funded);
    let early = signed_spend(&keypair(1), &[op], &[(50 * COIN - 1_000, script(2))]);

    let block = build_child(&chain, chain.best_hash(), script(1), vec![early], None, 0);
    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::ReorgAborted {
            cause: BlockError::Tx { source: TransactionError::ImmatureCoinbase { .. }, .. },
            ..
        }
    ));
}

// ----------------------------------------------------------------------
// Index-level rejections
// ----------------------------------------------------------------------

#[test]
fn orphan_block_rejected_with_parent_hash() {
    let mut chain = regtest_chain();
    let ghost_parent = Hash256([0x42; 32]);
    let mut block = build_child(&chain, chain.best_hash(), script(1), vec![], None, 0);
    block.header.prev_hash = ghost_parent;
    mine_in_place(&mut block);

    assert!(matches!(
        chain.accept_block(block, NOW),
        Err(ChainError::UnknownParent(parent)) if parent == ghost_parent
    ));
}

#[test]
fn replayed_block_rejected() {
    let mut chain = regtest_chain();
    let hashes = extend_chain(&mut chain, 2, script(1));
    let replay = chain.entry(&hashes[0]).unwrap().block.clone();

    assert!(matches!(
        chain.accept_block(replay, NOW),
        Err(ChainError::DuplicateBlock(h)) if h == hashes[0]
    ));
    assert_eq!(chain.height(), 2);
}

#[test]
fn far_future_timestamp_rejected() {
    let mut chain = regtest_chain();
    let block = build_child(
        &chain,
        chain.best_hash(),
        script(1),
        vec![],
        Some(NOW + 3 * 3600),
        0,
    );
    let err = chain.accept_block(block, NOW).unwrap_err();
    assert!(matches!(
        err,
        ChainError::ReorgAborted { cause: BlockError::TimestampTooFar { .. }, .. }
    ));
}

// ----------------------------------------------------------------------
// Atomicity under failed reorgs
// ----------------------------------------------------------------------

#[test]
fn poisoned_fork_never_disturbs_the_best_chain() {
    let mut chain = regtest_chain();
    extend_chain(&mut chain, 3, script(1));
    let best = chain.best_hash();
    let utxo_total = chain.utxo().total_value();
    let fork_parent = chain.hash_at_height(1).unwrap();

    // Two clean side-chain blocks, then a poisoned heavier tip whose
    // coinbase inflates the reward.
    let f2 = build_child(&chain, fork_parent, script(9), vec![], None, 50);
    chain.accept_block(f2.clone(), NOW).unwrap();
    let f3 = build_child(&chain, f2.header.hash(), script(9), vec![], None, 51);
    chain.accept_block(f3.clone(), NOW).unwrap();

    let mut f4 = build_child(&chain, f3.header.hash(), script(9), vec![], None, 52);
    f4.transactions[0].outputs[0].value = reward::subsidy(4) + 1;
    rebuild_merkle_and_mine(&mut f4);

    let err = chain.accept_block(f4, NOW).unwrap_err();
    assert!(matches!(err, ChainError::ReorgAborted { height: 4, .. }));

    // Nothing moved: tip, UTXO total, and the clean fork blocks' statuses.
    assert_eq!(chain.best_hash(), best);
    assert_eq!(chain.utxo().total_value(), utxo_total);
    assert_eq!(chain.height(), 3);
    use pebble_core::chain::EntryStatus;
    assert_eq!(chain.entry(&f2.header.hash()).unwrap().status, EntryStatus::SideChain);
    assert_eq!(chain.entry(&f3.header.hash()).unwrap().status, EntryStatus::SideChain);
}
