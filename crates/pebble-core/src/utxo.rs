//! The unspent transaction output set and its staging cache.
//!
//! [`UtxoSet`] maps outpoints to unspent outputs on the current best chain
//! and keeps a running value total. Apply/undo operations return and consume
//! per-transaction undo logs so blocks can be disconnected exactly.
//!
//! [`UtxoCache`] overlays a base set with pending changes (`None` marks a
//! staged delete). Reorgs stage their whole disconnect/connect sequence in
//! a cache and flush only after every block validates; dropping the cache
//! discards the stage.
//!
//! Failure semantics: every `apply_*` validates before mutating, so an
//! error leaves the set (or overlay) exactly as it was.

use std::collections::{BTreeMap, HashMap};

use crate::error::TransactionError;
use crate::types::{Block, OutPoint, Script, Transaction, Utxo};

/// Undo log for one transaction: the UTXOs its inputs consumed, in input
/// order.
pub type SpentUtxos = Vec<(OutPoint, Utxo)>;

/// Aggregate statistics over the set, split by coinbase maturity.
///
/// Maturity is derived on demand; it is never stored state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtxoStats {
    pub count: usize,
    pub total_value: u64,
    pub coinbase_count: usize,
    pub mature_value: u64,
    pub immature_value: u64,
}

/// Check a transaction's inputs against a UTXO view: presence, coinbase
/// maturity at `height`, and value conservation. Returns the total input
/// value.
fn check_spend<F>(tx: &Transaction, height: u32, view: F) -> Result<u64, TransactionError>
where
    F: Fn(&OutPoint) -> Option<Utxo>,
{
    let mut total_in: u64 = 0;
    for input in &tx.inputs {
        let utxo = view(&input.prevout).ok_or(TransactionError::MissingInput(input.prevout))?;
        if !utxo.is_spendable(height) {
            return Err(TransactionError::ImmatureCoinbase {
                height,
                maturity_at: utxo.maturity_height(),
            });
        }
        total_in = total_in
            .checked_add(utxo.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_out = tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;
    if total_in < total_out {
        return Err(TransactionError::NegativeFee {
            inputs: total_in,
            outputs: total_out,
        });
    }
    Ok(total_in)
}

/// The UTXO set for the current best chain.
#[derive(Clone, Debug, Default)]
pub struct UtxoSet {
    utxos: BTreeMap<OutPoint, Utxo>,
    total_value: u64,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Sum of all unspent values. With no burnt fees this equals total
    /// issuance up to the current height.
    pub fn total_value(&self) -> u64 {
        self.total_value
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos.iter()
    }

    fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) {
        let value = utxo.output.value;
        if let Some(old) = self.utxos.insert(outpoint, utxo) {
            self.total_value -= old.output.value;
        }
        self.total_value += value;
    }

    fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        let removed = self.utxos.remove(outpoint);
        if let Some(ref utxo) = removed {
            self.total_value -= utxo.output.value;
        }
        removed
    }

    /// Apply a transaction at `height`: spend its inputs and create its
    /// outputs. Returns the undo log of spent UTXOs.
    ///
    /// Validation (input presence, maturity, input ≥ output) happens before
    /// any mutation; failure leaves the set unmodified.
    pub fn apply_tx(
        &mut self,
        tx: &Transaction,
        height: u32,
    ) -> Result<SpentUtxos, TransactionError> {
        if !tx.is_coinbase {
            check_spend(tx, height, |op| self.utxos.get(op).copied())?;
        }

        let txid = tx.txid();
        let mut spent = Vec::new();
        if !tx.is_coinbase {
            for input in &tx.inputs {
                // Presence was checked above.
                if let Some(utxo) = self.remove(&input.prevout) {
                    spent.push((input.prevout, utxo));
                }
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            self.insert(outpoint, Utxo {
                output: *output,
                height,
                is_coinbase: tx.is_coinbase,
            });
        }
        Ok(spent)
    }

    /// Revert a previously applied transaction using its undo log.
    pub fn undo_tx(&mut self, tx: &Transaction, spent: SpentUtxos) {
        let txid = tx.txid();
        for index in 0..tx.outputs.len() {
            self.remove(&OutPoint { txid, index: index as u32 });
        }
        for (outpoint, utxo) in spent {
            self.insert(outpoint, utxo);
        }
    }

    /// Apply all of a block's transactions in order.
    ///
    /// Returns one undo log per transaction. If any transaction fails, the
    /// already-applied prefix is rolled back and the set is unchanged.
    pub fn apply_block(
        &mut self,
        block: &Block,
        height: u32,
    ) -> Result<Vec<SpentUtxos>, TransactionError> {
        let mut undos: Vec<SpentUtxos> = Vec::with_capacity(block.transactions.len());
        for (i, tx) in block.transactions.iter().enumerate() {
            match self.apply_tx(tx, height) {
                Ok(spent) => undos.push(spent),
                Err(e) => {
                    for (prev_tx, spent) in
                        block.transactions[..i].iter().rev().zip(undos.into_iter().rev())
                    {
                        self.undo_tx(prev_tx, spent);
                    }
                    return Err(e);
                }
            }
        }
        Ok(undos)
    }

    /// Revert a block using the undo logs returned by [`apply_block`].
    ///
    /// [`apply_block`]: Self::apply_block
    pub fn undo_block(&mut self, block: &Block, undos: Vec<SpentUtxos>) {
        for (tx, spent) in block.transactions.iter().rev().zip(undos.into_iter().rev()) {
            self.undo_tx(tx, spent);
        }
    }

    /// Total value locked to `script`, mature or not.
    pub fn balance_of(&self, script: &Script) -> u64 {
        self.utxos
            .values()
            .filter(|u| u.output.script == *script)
            .map(|u| u.output.value)
            .sum()
    }

    /// All outpoints locked to `script`, in outpoint order.
    pub fn utxos_for(&self, script: &Script) -> Vec<(OutPoint, Utxo)> {
        self.utxos
            .iter()
            .filter(|(_, u)| u.output.script == *script)
            .map(|(op, u)| (*op, *u))
            .collect()
    }

    /// Greedy smallest-first coin selection over spendable outputs.
    ///
    /// Returns `None` when the spendable balance cannot cover `amount`.
    pub fn select_for_amount(
        &self,
        script: &Script,
        amount: u64,
        current_height: u32,
    ) -> Option<Vec<OutPoint>> {
        let mut candidates: Vec<(OutPoint, u64)> = self
            .utxos
            .iter()
            .filter(|(_, u)| u.output.script == *script && u.is_spendable(current_height))
            .map(|(op, u)| (*op, u.output.value))
            .collect();
        candidates.sort_by_key(|&(op, value)| (value, op));

        let mut selected = Vec::new();
        let mut gathered: u64 = 0;
        for (outpoint, value) in candidates {
            if gathered >= amount {
                break;
            }
            selected.push(outpoint);
            gathered = gathered.saturating_add(value);
        }
        (gathered >= amount).then_some(selected)
    }

    /// Aggregate statistics, with maturity evaluated at `current_height`.
    pub fn stats(&self, current_height: u32) -> UtxoStats {
        let mut stats = UtxoStats::default();
        for utxo in self.utxos.values() {
            stats.count += 1;
            stats.total_value += utxo.output.value;
            if utxo.is_coinbase {
                stats.coinbase_count += 1;
            }
            if utxo.is_spendable(current_height) {
                stats.mature_value += utxo.output.value;
            } else {
                stats.immature_value += utxo.output.value;
            }
        }
        stats
    }

    /// Commit a cache overlay. The merge is a pure map application and
    /// cannot fail part-way.
    pub fn apply_overlay(&mut self, overlay: HashMap<OutPoint, Option<Utxo>>) {
        for (outpoint, slot) in overlay {
            match slot {
                Some(utxo) => self.insert(outpoint, utxo),
                None => {
                    self.remove(&outpoint);
                }
            }
        }
    }
}

/// A staging overlay over a base [`UtxoSet`].
///
/// Reads fall through to the base for untouched outpoints. All mutation is
/// buffered; call [`into_overlay`](Self::into_overlay) and
/// [`UtxoSet::apply_overlay`] to commit, or drop the cache to discard.
pub struct UtxoCache<'a> {
    base: &'a UtxoSet,
    overlay: HashMap<OutPoint, Option<Utxo>>,
}

impl<'a> UtxoCache<'a> {
    pub fn new(base: &'a UtxoSet) -> Self {
        Self { base, overlay: HashMap::new() }
    }

    /// Look up through the overlay, falling back to the base set.
    pub fn get(&self, outpoint: &OutPoint) -> Option<Utxo> {
        match self.overlay.get(outpoint) {
            Some(slot) => *slot,
            None => self.base.get(outpoint).copied(),
        }
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }

    /// Number of staged changes.
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    /// As [`UtxoSet::apply_tx`], staged in the overlay.
    pub fn apply_tx(
        &mut self,
        tx: &Transaction,
        height: u32,
    ) -> Result<SpentUtxos, TransactionError> {
        if !tx.is_coinbase {
            check_spend(tx, height, |op| self.get(op))?;
        }

        let txid = tx.txid();
        let mut spent = Vec::new();
        if !tx.is_coinbase {
            for input in &tx.inputs {
                if let Some(utxo) = self.get(&input.prevout) {
                    self.overlay.insert(input.prevout, None);
                    spent.push((input.prevout, utxo));
                }
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            self.overlay.insert(outpoint, Some(Utxo {
                output: *output,
                height,
                is_coinbase: tx.is_coinbase,
            }));
        }
        Ok(spent)
    }

    /// As [`UtxoSet::undo_tx`], staged in the overlay.
    pub fn undo_tx(&mut self, tx: &Transaction, spent: SpentUtxos) {
        let txid = tx.txid();
        for index in 0..tx.outputs.len() {
            self.overlay.insert(OutPoint { txid, index: index as u32 }, None);
        }
        for (outpoint, utxo) in spent {
            self.overlay.insert(outpoint, Some(utxo));
        }
    }

    /// As [`UtxoSet::apply_block`], staged in the overlay.
    pub fn apply_block(
        &mut self,
        block: &Block,
        height: u32,
    ) -> Result<Vec<SpentUtxos>, TransactionError> {
        let mut undos: Vec<SpentUtxos> = Vec::with_capacity(block.transactions.len());
        for (i, tx) in block.transactions.iter().enumerate() {
            match self.apply_tx(tx, height) {
                Ok(spent) => undos.push(spent),
                Err(e) => {
                    for (prev_tx, spent) in
                        block.transactions[..i].iter().rev().zip(undos.into_iter().rev())
                    {
                        self.undo_tx(prev_tx, spent);
                    }
                    return Err(e);
                }
            }
        }
        Ok(undos)
    }

    /// As [`UtxoSet::undo_block`], staged in the overlay.
    pub fn undo_block(&mut self, block: &Block, undos: Vec<SpentUtxos>) {
        for (tx, spent) in block.transactions.iter().rev().zip(undos.into_iter().rev()) {
            self.undo_tx(tx, spent);
        }
    }

    /// Consume the cache, yielding the overlay for
    /// [`UtxoSet::apply_overlay`].
    pub fn into_overlay(self) -> HashMap<OutPoint, Option<Utxo>> {
        self.overlay
    }
}
