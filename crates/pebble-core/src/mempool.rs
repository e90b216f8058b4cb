//! In-memory pool of unconfirmed transactions.
//!
//! Admission validates a transaction against the UTXO set *plus* the
//! outputs of in-pool ancestors, rejects double spends of any outpoint
//! already claimed in the pool, and enforces a minimum fee rate. Entries
//! carry their transitive ancestor and descendant sets, kept consistent in
//! both directions.
//!
//! Priority ordering is a lazy max-heap keyed by fee rate (milli-sats per
//! byte) with earlier entry time breaking ties; removals leave stale heap
//! keys behind that are skipped on pop. Eviction under pressure removes the
//! cheapest *leaf* entries (no in-pool descendants), never an entry
//! something else depends on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::constants::{MEMPOOL_TTL_SECS, MIN_FEE_RATE};
use crate::crypto;
use crate::error::{CryptoError, MempoolError, TransactionError};
use crate::hash::Hash256;
use crate::types::{OutPoint, Transaction, Utxo};
use crate::validation;

/// Default maximum number of transactions in the pool.
pub const DEFAULT_MAX_COUNT: usize = 5_000;

/// Default maximum total canonical bytes in the pool (5 MiB).
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Fee rates are stored in milli-sats per byte so ordering survives
/// integer division for sub-sat/byte differences.
const FEE_RATE_PRECISION: u64 = 1_000;

fn fee_rate_milli(fee: u64, size: usize) -> u64 {
    if size == 0 {
        return u64::MAX;
    }
    let rate = (fee as u128 * FEE_RATE_PRECISION as u128) / size as u128;
    rate.min(u64::MAX as u128) as u64
}

/// A pooled transaction with precomputed metadata and dependency links.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    /// Fee in sats (`inputs − outputs`).
    pub fee: u64,
    /// Canonical size in bytes.
    pub size: usize,
    fee_rate: u64,
    /// Unix seconds at admission.
    pub entry_time: u64,
    /// Tip height at admission.
    pub entry_height: u32,
    /// Transitive in-pool ancestors.
    pub ancestors: HashSet<Hash256>,
    /// Transitive in-pool descendants.
    pub descendants: HashSet<Hash256>,
}

impl MempoolEntry {
    /// Fee rate in milli-sats per byte.
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }
}

/// Pool limits and policy knobs.
#[derive(Clone, Debug)]
pub struct MempoolConfig {
    pub max_count: usize,
    pub max_bytes: usize,
    /// Minimum fee rate in sats per byte.
    pub min_fee_rate: u64,
    /// Entries older than this are pruned by housekeeping.
    pub ttl_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            max_bytes: DEFAULT_MAX_BYTES,
            min_fee_rate: MIN_FEE_RATE,
            ttl_secs: MEMPOOL_TTL_SECS,
        }
    }
}

/// Heap key: highest fee rate first, then earliest entry, then txid.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PrioKey {
    fee_rate: u64,
    entry_time: Reverse<u64>,
    txid: Hash256,
}

/// Counts from a block-reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entries dropped because the block confirmed them.
    pub confirmed: usize,
    /// Entries (with descendants) dropped for conflicting with the block.
    pub conflicts_evicted: usize,
    /// Disconnected transactions re-admitted after a reorg.
    pub reinjected: usize,
    /// Disconnected transactions that no longer validate.
    pub reinject_failed: usize,
    /// Entries dropped by TTL expiry.
    pub expired: usize,
}

/// Aggregate pool statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MempoolStats {
    pub count: usize,
    pub bytes: usize,
    pub total_fees: u64,
    /// Milli-sats per byte.
    pub min_fee_rate: u64,
    pub max_fee_rate: u64,
    pub oldest_entry_time: u64,
}

/// One row of [`Mempool::snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MempoolSnapshotEntry {
    pub txid: Hash256,
    pub fee: u64,
    pub size: usize,
    pub fee_rate: u64,
    pub entry_time: u64,
}

/// The pool of unconfirmed transactions.
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Spent outpoint → the single pool transaction spending it.
    by_outpoint: HashMap<OutPoint, Hash256>,
    /// Lazy priority heap; stale keys are skipped on pop.
    heap: BinaryHeap<PrioKey>,
    total_bytes: usize,
    config: MempoolConfig,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            heap: BinaryHeap::new(),
            total_bytes: 0,
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn total_fees(&self) -> u64 {
        self.entries.values().map(|e| e.fee).sum()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }

    /// Admit a transaction.
    ///
    /// `view` resolves confirmed UTXOs; inputs may also spend outputs of
    /// transactions already in the pool (the ancestor case). `tip_height`
    /// is the current best height — maturity is judged at the next block
    /// height, where the transaction could earliest confirm.
    pub fn admit<F>(
        &mut self,
        tx: Transaction,
        view: F,
        tip_height: u32,
        now: u64,
    ) -> Result<Hash256, MempoolError>
    where
        F: Fn(&OutPoint) -> Option<Utxo>,
    {
        validation::check_transaction(&tx)?;
        if tx.is_coinbase {
            return Err(MempoolError::Coinbase);
        }

        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyPresent(txid));
        }

        let spend_height = tip_height + 1;
        let mut direct_parents: HashSet<Hash256> = HashSet::new();
        let mut total_input: u64 = 0;

        for (index, input) in tx.inputs.iter().enumerate() {
            if let Some(&existing) = self.by_outpoint.get(&input.prevout) {
                return Err(MempoolError::Conflict {
                    existing_txid: existing,
                    outpoint: input.prevout,
                });
            }

            let resolved = if let Some(utxo) = view(&input.prevout) {
                if !utxo.is_spendable(spend_height) {
                    return Err(TransactionError::ImmatureCoinbase {
                        height: spend_height,
                        maturity_at: utxo.maturity_height(),
                    }
                    .into());
                }
                utxo
            } else if let Some(parent) = self.entries.get(&input.prevout.txid) {
                let output = parent
                    .tx
                    .outputs
                    .get(input.prevout.index as usize)
                    .ok_or(TransactionError::MissingInput(input.prevout))?;
                direct_parents.insert(parent.txid);
                Utxo { output: *output, height: spend_height, is_coinbase: false }
            } else {
                return Err(TransactionError::MissingInput(input.prevout).into());
            };

            crypto::verify_input(&tx, index, &resolved.output.script).map_err(|e| match e {
                CryptoError::VerificationFailed => TransactionError::ScriptMismatch { index },
                _ => TransactionError::InvalidSignature { index },
            })?;

            total_input = total_input
                .checked_add(resolved.output.value)
                .ok_or(TransactionError::ValueOverflow)?;
        }

        let total_output = tx
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow)?;
        if total_input < total_output {
            return Err(TransactionError::NegativeFee {
                inputs: total_input,
                outputs: total_output,
            }
            .into());
        }
        let fee = total_input - total_output;
        let size = tx.size();
        let fee_rate = fee_rate_milli(fee, size);
        let required = self.config.min_fee_rate.saturating_mul(FEE_RATE_PRECISION);
        if fee_rate < required {
            return Err(MempoolError::FeeTooLow { fee_rate, required });
        }

        // Transitive ancestor closure: direct parents plus everything they
        // already depend on.
        let mut ancestors = direct_parents.clone();
        for parent in &direct_parents {
            if let Some(entry) = self.entries.get(parent) {
                ancestors.extend(entry.ancestors.iter().copied());
            }
        }

        // Make room: evict cheapest leaves strictly below the newcomer's
        // rate. The newcomer's own ancestors are never eviction victims.
        while self.entries.len() >= self.config.max_count
            || self.total_bytes + size > self.config.max_bytes
        {
            match self.cheapest_leaf_below(fee_rate, &ancestors) {
                Some(victim) => {
                    self.remove_entry(&victim);
                }
                None => return Err(MempoolError::Full),
            }
        }

        for input in &tx.inputs {
            self.by_outpoint.insert(input.prevout, txid);
        }
        for ancestor in &ancestors {
            if let Some(entry) = self.entries.get_mut(ancestor) {
                entry.descendants.insert(txid);
            }
        }
        self.heap.push(PrioKey { fee_rate, entry_time: Reverse(now), txid });
        self.total_bytes += size;
        self.entries.insert(txid, MempoolEntry {
            tx,
            txid,
            fee,
            size,
            fee_rate,
            entry_time: now,
            entry_height: tip_height,
            ancestors,
            descendants: HashSet::new(),
        });

        Ok(txid)
    }

    /// The lowest-fee-rate leaf entry strictly below `rate`, excluding
    /// `protected` txids. Later arrivals lose ties.
    fn cheapest_leaf_below(&self, rate: u64, protected: &HashSet<Hash256>) -> Option<Hash256> {
        self.entries
            .values()
            .filter(|e| {
                e.descendants.is_empty() && e.fee_rate < rate && !protected.contains(&e.txid)
            })
            .min_by_key(|e| (e.fee_rate, Reverse(e.entry_time), e.txid))
            .map(|e| e.txid)
    }

    /// Remove one entry, unlinking its outpoints and dependency sets.
    ///
    /// Descendants are left in place (correct after the entry confirms);
    /// use [`remove_with_descendants`](Self::remove_with_descendants) when
    /// the entry became invalid.
    fn remove_entry(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            self.by_outpoint.remove(&input.prevout);
        }
        for ancestor in &entry.ancestors {
            if let Some(parent) = self.entries.get_mut(ancestor) {
                parent.descendants.remove(txid);
            }
        }
        for descendant in &entry.descendants {
            if let Some(child) = self.entries.get_mut(descendant) {
                child.ancestors.remove(txid);
            }
        }
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Remove an entry and its entire descendant closure.
    pub fn remove_with_descendants(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let mut removed = Vec::new();
        let Some(entry) = self.entries.get(txid) else {
            return removed;
        };
        // Descendant sets are transitive, so a single pass covers the tree.
        let mut doomed: Vec<Hash256> = entry.descendants.iter().copied().collect();
        doomed.push(*txid);
        for t in doomed {
            if let Some(e) = self.remove_entry(&t) {
                removed.push(e);
            }
        }
        removed
    }

    /// Select transactions for a block template.
    ///
    /// Greedy by fee rate, constrained so every selected transaction's
    /// ancestors precede it; entries whose ancestors miss the cut are
    /// deferred and retried, so the result is topologically ordered.
    /// TTL-expired and over-budget entries are skipped. Deterministic for
    /// a given pool state.
    ///
    /// Returns `(transaction, fee)` pairs.
    pub fn select_for_block(&self, max_bytes: usize, now: u64) -> Vec<(Transaction, u64)> {
        // Drain a clone of the lazy heap into priority order.
        let mut heap = self.heap.clone();
        let mut seen = HashSet::new();
        let mut candidates: Vec<&MempoolEntry> = Vec::with_capacity(self.entries.len());
        while let Some(key) = heap.pop() {
            if !seen.insert(key.txid) {
                continue; // stale key from a removed-and-readmitted txid
            }
            if let Some(entry) = self.entries.get(&key.txid) {
                candidates.push(entry);
            }
        }

        let mut selected: Vec<(Transaction, u64)> = Vec::new();
        let mut selected_ids: HashSet<Hash256> = HashSet::new();
        let mut remaining = max_bytes;
        let mut pending = candidates;

        loop {
            let mut progress = false;
            let mut deferred = Vec::new();
            for entry in pending {
                if now.saturating_sub(entry.entry_time) > self.config.ttl_secs {
                    continue;
                }
                if entry.size > remaining {
                    continue;
                }
                if entry.ancestors.iter().all(|a| selected_ids.contains(a)) {
                    selected_ids.insert(entry.txid);
                    remaining -= entry.size;
                    selected.push((entry.tx.clone(), entry.fee));
                    progress = true;
                } else {
                    deferred.push(entry);
                }
            }
            if !progress || deferred.is_empty() {
                break;
            }
            pending = deferred;
        }

        selected
    }

    /// Reconcile the pool with a best-chain change.
    ///
    /// Confirmed transactions are dropped; pool entries conflicting with a
    /// confirmed spend are evicted with their descendants; transactions
    /// disconnected by a reorg are re-admitted through the normal path
    /// (silently dropped when their inputs no longer resolve); finally
    /// TTL-expired entries are pruned.
    pub fn reconcile_block<F>(
        &mut self,
        connected: &[Transaction],
        disconnected: &[Transaction],
        new_tip_height: u32,
        view: F,
        now: u64,
    ) -> ReconcileSummary
    where
        F: Fn(&OutPoint) -> Option<Utxo>,
    {
        let mut summary = ReconcileSummary::default();

        for tx in connected {
            let txid = tx.txid();
            if self.remove_entry(&txid).is_some() {
                summary.confirmed += 1;
            }
            for input in &tx.inputs {
                if input.prevout.is_null() {
                    continue;
                }
                if let Some(&spender) = self.by_outpoint.get(&input.prevout) {
                    summary.conflicts_evicted += self.remove_with_descendants(&spender).len();
                }
            }
        }

        for tx in disconnected {
            match self.admit(tx.clone(), &view, new_tip_height, now) {
                Ok(_) => summary.reinjected += 1,
                Err(_) => summary.reinject_failed += 1,
            }
        }

        summary.expired = self.prune_expired(now);
        summary
    }

    /// Drop TTL-expired entries (and their descendants, which would no
    /// longer resolve). Returns the number of entries removed.
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let expired: Vec<Hash256> = self
            .entries
            .values()
            .filter(|e| now.saturating_sub(e.entry_time) > self.config.ttl_secs)
            .map(|e| e.txid)
            .collect();
        let mut removed = 0;
        for txid in expired {
            removed += self.remove_with_descendants(&txid).len();
        }
        removed
    }

    /// Aggregate statistics over the pool.
    pub fn stats(&self) -> MempoolStats {
        let mut stats = MempoolStats {
            count: self.entries.len(),
            bytes: self.total_bytes,
            ..MempoolStats::default()
        };
        if self.entries.is_empty() {
            return stats;
        }
        stats.min_fee_rate = u64::MAX;
        stats.oldest_entry_time = u64::MAX;
        for entry in self.entries.values() {
            stats.total_fees += entry.fee;
            stats.min_fee_rate = stats.min_fee_rate.min(entry.fee_rate);
            stats.max_fee_rate = stats.max_fee_rate.max(entry.fee_rate);
            stats.oldest_entry_time = stats.oldest_entry_time.min(entry.entry_time);
        }
        stats
    }

    /// Per-entry rows for RPC, ordered by descending fee rate.
    pub fn snapshot(&self) -> Vec<MempoolSnapshotEntry> {
        let mut rows: Vec<MempoolSnapshotEntry> = self
            .entries
            .values()
            .map(|e| MempoolSnapshotEntry {
                txid: e.txid,
                fee: e.fee,
                size: e.size,
                fee_rate: e.fee_rate,
                entry_time: e.entry_time,
            })
            .collect();
        rows.sort_by_key(|r| (Reverse(r.fee_rate), r.entry_time, r.txid));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::crypto::KeyPair;
    use crate::types::{Script, TxIn, TxOut};

    const NOW: u64 = 1_700_000_000;
    const TIP: u32 = 100;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn keypair(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes([seed; 32])
    }

    /// A confirmed-UTXO view backed by a map.
    fn view_of(
        utxos: HashMap<OutPoint, Utxo>,
    ) -> impl Fn(&OutPoint) -> Option<Utxo> {
        move |op| utxos.get(op).copied()
    }

    fn funded(op_seed: u8, value: u64, owner: &KeyPair) -> (OutPoint, Utxo) {
        (
            OutPoint { txid: Hash256([op_seed; 32]), index: 0 },
            Utxo {
                output: TxOut { value, script: owner.script() },
                height: 1,
                is_coinbase: false,
            },
        )
    }

    fn signed_spend(kp: &KeyPair, prevouts: &[OutPoint], outputs: &[(u64, Script)]) -> Transaction {
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
            crypto::sign_input(&mut tx, i, kp).unwrap();
        }
        tx
    }

    /// One funded keypair, one spend of it paying `fee` sats of fee.
    fn simple_setup(fee: u64) -> (Mempool, Transaction, impl Fn(&OutPoint) -> Option<Utxo>) {
        let kp = keypair(1);
        let (op, utxo) = funded(0x10, 10 * COIN, &kp);
        let tx = signed_spend(&kp, &[op], &[(10 * COIN - fee, keypair(2).script())]);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);
        (Mempool::with_defaults(), tx, view_of(utxos))
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    #[test]
    fn admits_a_valid_spend() {
        let (mut pool, tx, view) = simple_setup(10_000);
        let txid = pool.admit(tx.clone(), view, TIP, NOW).unwrap();

        assert!(pool.contains(&txid));
        let entry = pool.get(&txid).unwrap();
        assert_eq!(entry.fee, 10_000);
        assert_eq!(entry.size, tx.size());
        assert_eq!(entry.entry_time, NOW);
        assert_eq!(entry.entry_height, TIP);
        assert!(entry.ancestors.is_empty());
        assert_eq!(pool.total_bytes(), tx.size());
    }

    #[test]
    fn rejects_duplicate() {
        let (mut pool, tx, view) = simple_setup(10_000);
        let txid = pool.admit(tx.clone(), &view, TIP, NOW).unwrap();
        assert_eq!(
            pool.admit(tx, &view, TIP, NOW),
            Err(MempoolError::AlreadyPresent(txid))
        );
    }

    #[test]
    fn rejects_coinbase() {
        let mut pool = Mempool::with_defaults();
        let cb = Transaction {
            is_coinbase: true,
            inputs: vec![TxIn { prevout: OutPoint::null(), signature: vec![], pubkey: vec![] }],
            outputs: vec![TxOut { value: 50 * COIN, script: keypair(1).script() }],
        };
        assert_eq!(pool.admit(cb, |_| None, TIP, NOW), Err(MempoolError::Coinbase));
    }

    #[test]
    fn rejects_unknown_input() {
        let (mut pool, tx, _) = simple_setup(10_000);
        let err = pool.admit(tx.clone(), |_| None, TIP, NOW).unwrap_err();
        assert_eq!(
            err,
            MempoolError::Tx(TransactionError::MissingInput(tx.inputs[0].prevout))
        );
    }

    #[test]
    fn rejects_double_spend_with_conflict_details() {
        let kp = keypair(1);
        let (op, utxo) = funded(0x10, 10 * COIN, &kp);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);
        let view = view_of(utxos);

        let mut pool = Mempool::with_defaults();
        let tx1 = signed_spend(&kp, &[op], &[(10 * COIN - 10_000, keypair(2).script())]);
        let first = pool.admit(tx1, &view, TIP, NOW).unwrap();

        let tx2 = signed_spend(&kp, &[op], &[(10 * COIN - 20_000, keypair(3).script())]);
        assert_eq!(
            pool.admit(tx2, &view, TIP, NOW),
            Err(MempoolError::Conflict { existing_txid: first, outpoint: op })
        );
    }

    #[test]
    fn rejects_immature_coinbase_input() {
        let kp = keypair(1);
        let op = OutPoint { txid: Hash256([0x10; 32]), index: 0 };
        let mut utxos = HashMap::new();
        utxos.insert(op, Utxo {
            output: TxOut { value: 50 * COIN, script: kp.script() },
            height: TIP - 10,
            is_coinbase: true,
        });

        let mut pool = Mempool::with_defaults();
        let tx = signed_spend(&kp, &[op], &[(50 * COIN - 10_000, keypair(2).script())]);
        assert!(matches!(
            pool.admit(tx, view_of(utxos), TIP, NOW),
            Err(MempoolError::Tx(TransactionError::ImmatureCoinbase { .. }))
        ));
    }

    #[test]
    fn rejects_wrong_signature() {
        let kp = keypair(1);
        let thief = keypair(9);
        let (op, utxo) = funded(0x10, 10 * COIN, &kp);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);

        let mut pool = Mempool::with_defaults();
        let tx = signed_spend(&thief, &[op], &[(10 * COIN - 10_000, thief.script())]);
        assert_eq!(
            pool.admit(tx, view_of(utxos), TIP, NOW),
            Err(MempoolError::Tx(TransactionError::ScriptMismatch { index: 0 }))
        );
    }

    // ------------------------------------------------------------------
    // Fee policy
    // ------------------------------------------------------------------

    #[test]
    fn fee_exactly_at_floor_admitted_one_sat_less_rejected() {
        // Build once to learn the size, then pay exactly size * MIN_FEE_RATE.
        let (_, probe, _) = simple_setup(0);
        let size = probe.size() as u64;
        let exact_fee = size * MIN_FEE_RATE;

        let (mut pool, tx, view) = simple_setup(exact_fee);
        assert_eq!(tx.size() as u64, size, "fee change must not alter size");
        assert!(pool.admit(tx, view, TIP, NOW).is_ok());

        let (mut pool, tx, view) = simple_setup(exact_fee - 1);
        let err = pool.admit(tx, view, TIP, NOW).unwrap_err();
        assert!(matches!(err, MempoolError::FeeTooLow { .. }));
    }

    #[test]
    fn zero_fee_rejected() {
        let (mut pool, tx, view) = simple_setup(0);
        assert!(matches!(
            pool.admit(tx, view, TIP, NOW),
            Err(MempoolError::FeeTooLow { .. })
        ));
    }

    // ------------------------------------------------------------------
    // Ancestors and descendants
    // ------------------------------------------------------------------

    /// Parent in the pool pays kp2; child spends the parent's output.
    fn parent_child_setup() -> (Mempool, Hash256, Hash256) {
        let kp1 = keypair(1);
        let kp2 = keypair(2);
        let (op, utxo) = funded(0x10, 10 * COIN, &kp1);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);
        let view = view_of(utxos);

        let mut pool = Mempool::with_defaults();
        let parent = signed_spend(&kp1, &[op], &[(10 * COIN - 50_000, kp2.script())]);
        let parent_id = pool.admit(parent.clone(), &view, TIP, NOW).unwrap();

        let child_op = OutPoint { txid: parent_id, index: 0 };
        let child = signed_spend(&kp2, &[child_op], &[(10 * COIN - 150_000, keypair(3).script())]);
        let child_id = pool.admit(child, &view, TIP, NOW + 1).unwrap();

        (pool, parent_id, child_id)
    }

    #[test]
    fn in_pool_parent_resolves_and_links() {
        let (pool, parent_id, child_id) = parent_child_setup();

        let child = pool.get(&child_id).unwrap();
        assert!(child.ancestors.contains(&parent_id));
        let parent = pool.get(&parent_id).unwrap();
        assert!(parent.descendants.contains(&child_id));
        // Closure invariant both ways.
        assert_eq!(child.ancestors.len(), 1);
        assert_eq!(parent.descendants.len(), 1);
    }

    #[test]
    fn grandchild_gets_transitive_ancestors() {
        let (mut pool, parent_id, child_id) = parent_child_setup();

        let kp3 = keypair(3);
        let gc_op = OutPoint { txid: child_id, index: 0 };
        let grandchild =
            signed_spend(&kp3, &[gc_op], &[(10 * COIN - 300_000, keypair(4).script())]);
        let gc_id = pool.admit(grandchild, |_| None, TIP, NOW + 2).unwrap();

        let gc = pool.get(&gc_id).unwrap();
        assert!(gc.ancestors.contains(&parent_id));
        assert!(gc.ancestors.contains(&child_id));
        assert!(pool.get(&parent_id).unwrap().descendants.contains(&gc_id));
    }

    #[test]
    fn remove_with_descendants_clears_subtree() {
        let (mut pool, parent_id, child_id) = parent_child_setup();
        let removed = pool.remove_with_descendants(&parent_id);
        assert_eq!(removed.len(), 2);
        assert!(!pool.contains(&parent_id));
        assert!(!pool.contains(&child_id));
        assert!(pool.is_empty());
        assert_eq!(pool.total_bytes(), 0);
    }

    // ------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------

    /// An independent funded spend with a chosen fee.
    fn independent_spend(seed: u8, fee: u64) -> (Transaction, HashMap<OutPoint, Utxo>) {
        let kp = keypair(seed);
        let (op, utxo) = funded(seed, 10 * COIN, &kp);
        let tx = signed_spend(&kp, &[op], &[(10 * COIN - fee, keypair(seed + 100).script())]);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);
        (tx, utxos)
    }

    fn pool_of(max_count: usize) -> Mempool {
        Mempool::new(MempoolConfig { max_count, ..MempoolConfig::default() })
    }

    #[test]
    fn full_pool_evicts_cheapest_leaf() {
        let mut pool = pool_of(2);
        let (low, v1) = independent_spend(1, 10_000);
        let (high, v2) = independent_spend(2, 100_000);
        let (mid, v3) = independent_spend(3, 50_000);

        let low_id = pool.admit(low, view_of(v1), TIP, NOW).unwrap();
        let high_id = pool.admit(high, view_of(v2), TIP, NOW).unwrap();
        let mid_id = pool.admit(mid, view_of(v3), TIP, NOW).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&low_id));
        assert!(pool.contains(&high_id));
        assert!(pool.contains(&mid_id));
    }

    #[test]
    fn full_pool_rejects_cheaper_newcomer() {
        let mut pool = pool_of(2);
        let (a, va) = independent_spend(1, 50_000);
        let (b, vb) = independent_spend(2, 100_000);
        let (cheap, vc) = independent_spend(3, 10_000);

        pool.admit(a, view_of(va), TIP, NOW).unwrap();
        pool.admit(b, view_of(vb), TIP, NOW).unwrap();
        assert_eq!(
            pool.admit(cheap, view_of(vc), TIP, NOW),
            Err(MempoolError::Full)
        );
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn eviction_never_removes_non_leaves() {
        // Pool of 2 holding a parent-child chain; a richer newcomer cannot
        // evict the parent (not a leaf) and the child outranks it or not
        // depending on fees — here the child is cheaper, so it goes.
        let (mut pool, parent_id, child_id) = parent_child_setup();
        pool.config.max_count = 2;

        let parent_rate = pool.get(&parent_id).unwrap().fee_rate();
        let child_rate = pool.get(&child_id).unwrap().fee_rate();
        assert!(child_rate > parent_rate, "child pays the higher rate here");

        // Newcomer outbids both.
        let (rich, vr) = independent_spend(7, 1_000_000);
        pool.admit(rich, view_of(vr), TIP, NOW + 5).unwrap();

        // The parent survived even though it is the cheapest entry,
        // because it was never a leaf; the child went instead.
        assert!(pool.contains(&parent_id));
        assert!(!pool.contains(&child_id));
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    #[test]
    fn selection_orders_by_fee_rate() {
        let mut pool = Mempool::with_defaults();
        let (low, v1) = independent_spend(1, 10_000);
        let (high, v2) = independent_spend(2, 100_000);
        let (mid, v3) = independent_spend(3, 50_000);

        let low_id = pool.admit(low, view_of(v1), TIP, NOW).unwrap();
        let high_id = pool.admit(high, view_of(v2), TIP, NOW).unwrap();
        let mid_id = pool.admit(mid, view_of(v3), TIP, NOW).unwrap();

        let selected = pool.select_for_block(1_000_000, NOW);
        let order: Vec<Hash256> = selected.iter().map(|(tx, _)| tx.txid()).collect();
        assert_eq!(order, vec![high_id, mid_id, low_id]);
    }

    #[test]
    fn selection_respects_byte_budget() {
        let mut pool = Mempool::with_defaults();
        let (a, va) = independent_spend(1, 100_000);
        let (b, vb) = independent_spend(2, 50_000);
        let a_size = a.size();

        pool.admit(a, view_of(va), TIP, NOW).unwrap();
        pool.admit(b, view_of(vb), TIP, NOW).unwrap();

        let selected = pool.select_for_block(a_size, NOW);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn selection_puts_ancestors_before_descendants() {
        let (pool, parent_id, child_id) = parent_child_setup();
        // The child pays a higher rate, but the parent must come first.
        let selected = pool.select_for_block(1_000_000, NOW + 10);
        let order: Vec<Hash256> = selected.iter().map(|(tx, _)| tx.txid()).collect();
        assert_eq!(order, vec![parent_id, child_id]);
    }

    #[test]
    fn selection_skips_expired_entries() {
        let (mut pool, tx, view) = simple_setup(10_000);
        let ttl = pool.config.ttl_secs;
        pool.admit(tx, view, TIP, NOW).unwrap();

        assert_eq!(pool.select_for_block(1_000_000, NOW + ttl + 1).len(), 0);
        assert_eq!(pool.select_for_block(1_000_000, NOW + ttl).len(), 1);
    }

    #[test]
    fn selection_is_deterministic() {
        let mut pool = Mempool::with_defaults();
        for seed in 1..6u8 {
            let (tx, v) = independent_spend(seed, 10_000 * seed as u64);
            pool.admit(tx, view_of(v), TIP, NOW).unwrap();
        }
        let a = pool.select_for_block(1_000_000, NOW);
        let b = pool.select_for_block(1_000_000, NOW);
        let ids = |sel: &[(Transaction, u64)]| -> Vec<Hash256> {
            sel.iter().map(|(tx, _)| tx.txid()).collect()
        };
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn stale_heap_keys_are_skipped() {
        let mut pool = Mempool::with_defaults();
        let (a, va) = independent_spend(1, 100_000);
        let a_id = pool.admit(a, view_of(va), TIP, NOW).unwrap();
        pool.remove_with_descendants(&a_id);

        // The heap still holds a's key; selection must not resurrect it.
        assert!(pool.select_for_block(1_000_000, NOW).is_empty());
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    #[test]
    fn confirmed_txs_leave_the_pool() {
        let (mut pool, tx, view) = simple_setup(10_000);
        let txid = pool.admit(tx.clone(), &view, TIP, NOW).unwrap();

        let summary = pool.reconcile_block(&[tx], &[], TIP + 1, &view, NOW);
        assert_eq!(summary.confirmed, 1);
        assert!(!pool.contains(&txid));
        assert!(pool.is_empty());
    }

    #[test]
    fn confirmed_parent_keeps_child_valid() {
        let (mut pool, parent_id, child_id) = parent_child_setup();
        let parent_tx = pool.get(&parent_id).unwrap().tx.clone();

        // Confirming the parent leaves the child in the pool with its
        // ancestor link cleared.
        pool.reconcile_block(&[parent_tx], &[], TIP + 1, |_| None, NOW + 2);
        assert!(!pool.contains(&parent_id));
        let child = pool.get(&child_id).unwrap();
        assert!(child.ancestors.is_empty());
    }

    #[test]
    fn conflicting_spends_are_evicted_with_descendants() {
        let kp = keypair(1);
        let (op, utxo) = funded(0x10, 10 * COIN, &kp);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);
        let view = view_of(utxos);

        let mut pool = Mempool::with_defaults();
        let pooled = signed_spend(&kp, &[op], &[(10 * COIN - 50_000, keypair(2).script())]);
        let pooled_id = pool.admit(pooled, &view, TIP, NOW).unwrap();

        // A different tx spending the same outpoint confirms in a block.
        let confirmed = signed_spend(&kp, &[op], &[(10 * COIN - 60_000, keypair(3).script())]);
        let summary = pool.reconcile_block(&[confirmed], &[], TIP + 1, &view, NOW);

        assert_eq!(summary.conflicts_evicted, 1);
        assert!(!pool.contains(&pooled_id));
    }

    #[test]
    fn disconnected_txs_are_reinjected() {
        let kp = keypair(1);
        let (op, utxo) = funded(0x10, 10 * COIN, &kp);
        let mut utxos = HashMap::new();
        utxos.insert(op, utxo);
        let view = view_of(utxos);

        let mut pool = Mempool::with_defaults();
        let tx = signed_spend(&kp, &[op], &[(10 * COIN - 50_000, keypair(2).script())]);
        let txid = tx.txid();

        let summary = pool.reconcile_block(&[], &[tx], TIP, &view, NOW);
        assert_eq!(summary.reinjected, 1);
        assert!(pool.contains(&txid));
    }

    #[test]
    fn unreinjectable_disconnected_tx_is_dropped() {
        let kp = keypair(1);
        let (op, _) = funded(0x10, 10 * COIN, &kp);
        let tx = signed_spend(&kp, &[op], &[(10 * COIN - 50_000, keypair(2).script())]);

        let mut pool = Mempool::with_defaults();
        // The funding UTXO is gone (spent on the new branch).
        let summary = pool.reconcile_block(&[], &[tx.clone()], TIP, |_| None, NOW);
        assert_eq!(summary.reinject_failed, 1);
        assert!(!pool.contains(&tx.txid()));
    }

    #[test]
    fn ttl_prune_removes_old_entries() {
        let (mut pool, tx, view) = simple_setup(10_000);
        let ttl = pool.config.ttl_secs;
        let txid = pool.admit(tx, view, TIP, NOW).unwrap();

        assert_eq!(pool.prune_expired(NOW + ttl), 0);
        assert_eq!(pool.prune_expired(NOW + ttl + 1), 1);
        assert!(!pool.contains(&txid));
    }

    // ------------------------------------------------------------------
    // Stats and snapshot
    // ------------------------------------------------------------------

    #[test]
    fn stats_track_pool_contents() {
        let mut pool = Mempool::with_defaults();
        assert_eq!(pool.stats(), MempoolStats::default());

        let (a, va) = independent_spend(1, 10_000);
        let (b, vb) = independent_spend(2, 100_000);
        let a_size = a.size();
        let b_size = b.size();
        pool.admit(a, view_of(va), TIP, NOW).unwrap();
        pool.admit(b, view_of(vb), TIP, NOW + 5).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.bytes, a_size + b_size);
        assert_eq!(stats.total_fees, 110_000);
        assert_eq!(stats.oldest_entry_time, NOW);
        assert!(stats.min_fee_rate <= stats.max_fee_rate);
    }

    #[test]
    fn snapshot_is_fee_rate_descending() {
        let mut pool = Mempool::with_defaults();
        for seed in 1..5u8 {
            let (tx, v) = independent_spend(seed, 25_000 * seed as u64);
            pool.admit(tx, view_of(v), TIP, NOW).unwrap();
        }
        let rows = pool.snapshot();
        assert_eq!(rows.len(), 4);
        for pair in rows.windows(2) {
            assert!(pair[0].fee_rate >= pair[1].fee_rate);
        }
    }
}
