//! Full-node composition and event handling.
//!
//! [`Node`] owns the chain state and mempool behind a single writer lock
//! (the "chain lock"): block connects and reorgs serialize through it,
//! readers take shared access for queries. The miner drops the lock while
//! grinding nonces and re-checks the tip between batches; housekeeping
//! prunes the mempool and snapshots on a timer. Outbound announcements go
//! through the [`BroadcastSink`] the node was constructed with.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info, info_span, warn};

use pebble_consensus as consensus;
use pebble_core::PebbleError;
use pebble_core::chain::{AcceptedBlock, ChainState, ChainStats};
use pebble_core::hash::Hash256;
use pebble_core::mempool::{Mempool, MempoolSnapshotEntry, MempoolStats};
use pebble_core::types::{Block, OutPoint, Script, Transaction, Utxo};

use crate::config::NodeConfig;
use crate::p2p::{BroadcastSink, InvItem, NetworkEvent, PeerId};
use crate::storage;

/// Nonces per mining batch before the lock is re-taken to check the tip.
const MINING_BATCH: u64 = 50_000;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runtime metrics. Approximate counters only; never consulted for
/// consensus.
#[derive(Default)]
pub struct NodeMetrics {
    pub blocks_connected: AtomicU64,
    pub reorgs: AtomicU64,
    pub txs_accepted: AtomicU64,
    pub mempool_size: AtomicU64,
}

/// Everything guarded by the chain lock.
struct CoreState {
    chain: ChainState,
    mempool: Mempool,
}

/// Where a transaction was found by [`Node::get_tx`].
#[derive(Clone, Debug)]
pub enum TxLocation {
    Mempool,
    Chain { height: u32, block_hash: Hash256 },
}

/// The full node.
pub struct Node {
    core: RwLock<CoreState>,
    config: NodeConfig,
    broadcast: Box<dyn BroadcastSink>,
    metrics: NodeMetrics,
    stop: AtomicBool,
    blocks_since_snapshot: AtomicU64,
}

impl Node {
    /// Open a node: restore the chain from the snapshot directory, or start
    /// fresh from genesis.
    pub fn open(
        config: NodeConfig,
        broadcast: Box<dyn BroadcastSink>,
    ) -> Result<Arc<Self>, PebbleError> {
        let params = config.params();
        let chain = match storage::load_snapshot(&config.snapshot_dir(), &params, unix_now())? {
            Some(chain) => {
                info!(height = chain.height(), tip = %chain.best_hash(), "chain state restored");
                chain
            }
            None => {
                let chain = ChainState::new(params);
                info!(genesis = %chain.genesis_hash(), "starting fresh chain");
                chain
            }
        };

        Ok(Arc::new(Self {
            core: RwLock::new(CoreState { chain, mempool: Mempool::with_defaults() }),
            config,
            broadcast,
            metrics: NodeMetrics::default(),
            stop: AtomicBool::new(false),
            blocks_since_snapshot: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Admit a transaction to the mempool and announce it.
    pub fn submit_tx(&self, tx: Transaction) -> Result<Hash256, PebbleError> {
        let (txid, pool_size) = {
            let mut core = self.core.write();
            let CoreState { chain, mempool } = &mut *core;
            let tip_height = chain.height();
            let utxo = chain.utxo();
            let txid = mempool.admit(tx, |op| utxo.get(op).copied(), tip_height, unix_now())?;
            (txid, mempool.len())
        };

        self.metrics.txs_accepted.fetch_add(1, Ordering::Relaxed);
        self.metrics.mempool_size.store(pool_size as u64, Ordering::Relaxed);
        debug!(%txid, "transaction accepted to mempool");
        self.broadcast.broadcast_inv(&[InvItem::Tx(txid)]);
        Ok(txid)
    }

    /// Accept a block, reconcile the mempool, announce, and maybe snapshot.
    pub fn submit_block(
        &self,
        block: Block,
        origin: Option<PeerId>,
    ) -> Result<Hash256, PebbleError> {
        let now = unix_now();
        let block_hash = block.header.hash();
        let _span = info_span!("submit_block", %block_hash, ?origin).entered();

        let (hash, connected) = {
            let mut core = self.core.write();
            let CoreState { chain, mempool } = &mut *core;
            match chain.accept_block(block, now)? {
                AcceptedBlock::Connected { hash, height, events } => {
                    let reorged = !events.disconnected_txs.is_empty();
                    let tip_height = chain.height();
                    let utxo = chain.utxo();
                    let summary = mempool.reconcile_block(
                        &events.connected_txs,
                        &events.disconnected_txs,
                        tip_height,
                        |op| utxo.get(op).copied(),
                        now,
                    );

                    info!(height, tip = %hash, ?summary, "block connected");
                    self.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
                    if reorged {
                        self.metrics.reorgs.fetch_add(1, Ordering::Relaxed);
                    }
                    self.metrics
                        .mempool_size
                        .store(mempool.len() as u64, Ordering::Relaxed);
                    (hash, true)
                }
                AcceptedBlock::SideChain { hash, height } => {
                    debug!(height, "block indexed as side chain");
                    (hash, false)
                }
            }
        };

        if connected {
            self.broadcast.broadcast_inv(&[InvItem::Block(hash)]);
            self.maybe_snapshot();
        }
        Ok(hash)
    }

    /// Dispatch an inbound network event.
    ///
    /// Invalid relayed objects are logged and dropped; the transport layer
    /// owns peer scoring and retries.
    pub fn on_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Tx { tx, peer } => {
                if let Err(e) = self.submit_tx(tx) {
                    debug!(peer, "rejected relayed transaction: {e}");
                }
            }
            NetworkEvent::Block { block, peer } => {
                if let Err(e) = self.submit_block(block, Some(peer)) {
                    debug!(peer, "rejected relayed block: {e}");
                }
            }
            NetworkEvent::Inv { items, peer } => {
                let unknown: Vec<InvItem> = {
                    let core = self.core.read();
                    items
                        .into_iter()
                        .filter(|item| match item {
                            InvItem::Tx(txid) => {
                                !core.mempool.contains(txid)
                                    && core.chain.find_tx(txid).is_none()
                            }
                            InvItem::Block(hash) => core.chain.entry(hash).is_none(),
                        })
                        .collect()
                };
                if !unknown.is_empty() {
                    self.broadcast.request(&unknown, peer);
                }
            }
        }
    }

    /// Mine `count` blocks paying `script`, submitting each through the
    /// normal acceptance path. Intended for regtest tooling and RPC
    /// `generatetoaddress`; blocks until the requested blocks are found.
    pub fn generate_to(&self, script: &Script, count: u32) -> Result<Vec<Hash256>, PebbleError> {
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut template = {
                let core = self.core.read();
                consensus::build_template(&core.chain, &core.mempool, script, unix_now())
            };
            let block = loop {
                if let Some(block) = consensus::mine(&mut template, MINING_BATCH) {
                    break block;
                }
            };
            hashes.push(self.submit_block(block, None)?);
        }
        Ok(hashes)
    }

    // ------------------------------------------------------------------
    // Queries (shared lock)
    // ------------------------------------------------------------------

    pub fn best_block_hash(&self) -> Hash256 {
        self.core.read().chain.best_hash()
    }

    pub fn block_count(&self) -> u32 {
        self.core.read().chain.height()
    }

    /// Block plus its height, by hash (side chains included; side-chain
    /// heights are the fork-relative ones recorded at acceptance).
    pub fn get_block(&self, hash: &Hash256) -> Option<(Block, u32)> {
        let core = self.core.read();
        core.chain.entry(hash).map(|e| (e.block.clone(), e.height))
    }

    pub fn get_block_by_height(&self, height: u32) -> Option<(Block, Hash256)> {
        let core = self.core.read();
        core.chain
            .entry_by_height(height)
            .map(|e| (e.block.clone(), e.hash))
    }

    /// Look up a transaction in the mempool first, then the best chain.
    pub fn get_tx(&self, txid: &Hash256) -> Option<(Transaction, TxLocation)> {
        let core = self.core.read();
        if let Some(entry) = core.mempool.get(txid) {
            return Some((entry.tx.clone(), TxLocation::Mempool));
        }
        core.chain
            .find_tx(txid)
            .map(|(tx, height, block_hash)| (tx, TxLocation::Chain { height, block_hash }))
    }

    pub fn balance_of(&self, script: &Script) -> u64 {
        self.core.read().chain.utxo().balance_of(script)
    }

    pub fn list_utxos(&self, script: &Script) -> Vec<(OutPoint, Utxo)> {
        self.core.read().chain.utxo().utxos_for(script)
    }

    pub fn mempool_stats(&self) -> MempoolStats {
        self.core.read().mempool.stats()
    }

    pub fn mempool_snapshot(&self) -> Vec<MempoolSnapshotEntry> {
        self.core.read().mempool.snapshot()
    }

    pub fn chain_stats(&self) -> ChainStats {
        self.core.read().chain.chain_stats()
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    /// Run housekeeping (and mining when enabled) until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut tasks = vec![tokio::spawn(Arc::clone(&self).housekeeping_loop())];
        if self.config.enable_mining {
            tasks.push(tokio::spawn(Arc::clone(&self).mining_loop()));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Cooperative mining loop: build a template under the shared lock,
    /// grind a bounded batch without it, and discard stale templates when
    /// the tip moves.
    pub async fn mining_loop(self: Arc<Self>) {
        let Some(script) = self.config.miner_address else {
            warn!("mining enabled but no miner address configured");
            return;
        };
        info!(miner = %script, "mining loop started");

        while !self.stop.load(Ordering::Relaxed) {
            let (tip, mut template) = {
                let core = self.core.read();
                (
                    core.chain.best_hash(),
                    consensus::build_template(&core.chain, &core.mempool, &script, unix_now()),
                )
            };

            loop {
                if self.stop.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(block) = consensus::mine(&mut template, MINING_BATCH) {
                    match self.submit_block(block, None) {
                        Ok(hash) => info!(%hash, "mined block submitted"),
                        Err(e) => debug!("mined block rejected: {e}"),
                    }
                    break;
                }
                if self.core.read().chain.best_hash() != tip {
                    debug!("tip moved, discarding stale template");
                    break;
                }
                tokio::task::yield_now().await;
            }
        }
    }

    /// Periodic TTL pruning and snapshotting.
    pub async fn housekeeping_loop(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.housekeeping_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.stop.load(Ordering::Relaxed) {
            ticker.tick().await;
            let expired = self.core.write().mempool.prune_expired(unix_now());
            if expired > 0 {
                debug!(expired, "pruned expired mempool entries");
            }
            if let Err(e) = self.snapshot() {
                warn!("periodic snapshot failed: {e}");
            }
        }
    }

    /// Signal the background loops to stop and write a final snapshot.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Err(e) = self.snapshot() {
            warn!("shutdown snapshot failed: {e}");
        }
    }

    /// Write a snapshot now, under the shared lock.
    pub fn snapshot(&self) -> Result<(), PebbleError> {
        let core = self.core.read();
        storage::save_snapshot(&self.config.snapshot_dir(), &core.chain)
    }

    /// Count connected blocks and snapshot every `snapshot_interval`.
    fn maybe_snapshot(&self) {
        let n = self.blocks_since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= self.config.snapshot_interval {
            self.blocks_since_snapshot.store(0, Ordering::Relaxed);
            if let Err(e) = self.snapshot() {
                warn!("snapshot failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::{NullSink, RecordingSink};
    use pebble_core::constants::{COIN, COINBASE_MATURITY, NetworkType};
    use pebble_core::crypto::{self, KeyPair};
    use pebble_core::types::TxIn;
    use tempfile::TempDir;

    fn test_node(dir: &TempDir) -> Arc<Node> {
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::for_network(NetworkType::Regtest)
        };
        Node::open(config, Box::new(NullSink)).unwrap()
    }

    fn keypair(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes([seed; 32])
    }

    // ------------------------------------------------------------------
    // Startup and persistence
    // ------------------------------------------------------------------

    #[test]
    fn fresh_node_starts_at_genesis() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        assert_eq!(node.block_count(), 0);
        assert!(node.get_block_by_height(0).is_some());
    }

    #[test]
    fn restart_restores_chain() {
        let dir = TempDir::new().unwrap();
        let tip = {
            let node = test_node(&dir);
            node.generate_to(&Script([1; 20]), 3).unwrap();
            node.shutdown();
            node.best_block_hash()
        };

        let node = test_node(&dir);
        assert_eq!(node.block_count(), 3);
        assert_eq!(node.best_block_hash(), tip);
    }

    // ------------------------------------------------------------------
    // Mining and submission
    // ------------------------------------------------------------------

    #[test]
    fn generate_to_extends_chain_and_pays_miner() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        let script = Script([2; 20]);

        let hashes = node.generate_to(&script, 2).unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(node.block_count(), 2);
        assert_eq!(node.best_block_hash(), hashes[1]);
        assert_eq!(node.balance_of(&script), 100 * COIN);
        assert_eq!(node.list_utxos(&script).len(), 2);
    }

    #[test]
    fn duplicate_block_submission_fails() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        let hash = node.generate_to(&Script([2; 20]), 1).unwrap()[0];
        let (block, _) = node.get_block(&hash).unwrap();
        assert!(node.submit_block(block, None).is_err());
    }

    #[test]
    fn connected_blocks_are_broadcast() {
        let dir = TempDir::new().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::for_network(NetworkType::Regtest)
        };
        let sink = Arc::new(RecordingSink::new());
        struct Fwd(Arc<RecordingSink>);
        impl BroadcastSink for Fwd {
            fn broadcast_inv(&self, items: &[InvItem]) {
                self.0.broadcast_inv(items);
            }
            fn request(&self, items: &[InvItem], peer: PeerId) {
                self.0.request(items, peer);
            }
        }
        let node = Node::open(config, Box::new(Fwd(Arc::clone(&sink)))).unwrap();

        let hash = node.generate_to(&Script([2; 20]), 1).unwrap()[0];
        assert!(sink.broadcasts.lock().contains(&InvItem::Block(hash)));
    }

    // ------------------------------------------------------------------
    // Transactions through the node
    // ------------------------------------------------------------------

    #[test]
    fn spend_flows_from_mempool_to_block() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        let kp = keypair(1);

        // Mature one coinbase for kp.
        node.generate_to(&kp.script(), 1).unwrap();
        node.generate_to(&Script([0xFF; 20]), COINBASE_MATURITY).unwrap();

        let (op, utxo) = node.list_utxos(&kp.script())[0];
        let mut tx = Transaction {
            is_coinbase: false,
            inputs: vec![TxIn { prevout: op, signature: vec![], pubkey: vec![] }],
            outputs: vec![pebble_core::types::TxOut {
                value: utxo.output.value - 10_000,
                script: keypair(2).script(),
            }],
        };
        crypto::sign_input(&mut tx, 0, &kp).unwrap();

        let txid = node.submit_tx(tx).unwrap();
        assert!(matches!(node.get_tx(&txid), Some((_, TxLocation::Mempool))));
        assert_eq!(node.mempool_stats().count, 1);

        // Mine it.
        node.generate_to(&Script([0xFF; 20]), 1).unwrap();
        assert_eq!(node.mempool_stats().count, 0);
        assert!(matches!(node.get_tx(&txid), Some((_, TxLocation::Chain { .. }))));
        assert_eq!(node.balance_of(&keypair(2).script()), utxo.output.value - 10_000);
    }

    #[test]
    fn invalid_tx_is_rejected() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        let kp = keypair(1);
        let tx = {
            let mut tx = Transaction {
                is_coinbase: false,
                inputs: vec![TxIn {
                    prevout: OutPoint { txid: Hash256([9; 32]), index: 0 },
                    signature: vec![],
                    pubkey: vec![],
                }],
                outputs: vec![pebble_core::types::TxOut {
                    value: COIN,
                    script: kp.script(),
                }],
            };
            crypto::sign_input(&mut tx, 0, &kp).unwrap();
            tx
        };
        assert!(node.submit_tx(tx).is_err());
        assert_eq!(node.mempool_stats().count, 0);
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    #[test]
    fn unknown_inv_items_are_requested() {
        let dir = TempDir::new().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::for_network(NetworkType::Regtest)
        };
        let sink = Arc::new(RecordingSink::new());
        struct Fwd(Arc<RecordingSink>);
        impl BroadcastSink for Fwd {
            fn broadcast_inv(&self, items: &[InvItem]) {
                self.0.broadcast_inv(items);
            }
            fn request(&self, items: &[InvItem], peer: PeerId) {
                self.0.request(items, peer);
            }
        }
        let node = Node::open(config, Box::new(Fwd(Arc::clone(&sink)))).unwrap();
        let known = node.generate_to(&Script([1; 20]), 1).unwrap()[0];

        let unknown = InvItem::Block(Hash256([0x55; 32]));
        node.on_event(NetworkEvent::Inv {
            items: vec![InvItem::Block(known), unknown],
            peer: 3,
        });

        let requests = sink.requests.lock();
        assert_eq!(requests.as_slice(), &[(3, vec![unknown])]);
    }

    #[test]
    fn relayed_block_connects_via_event() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let node_a = test_node(&dir_a);
        let node_b = test_node(&dir_b);

        let hash = node_a.generate_to(&Script([1; 20]), 1).unwrap()[0];
        let (block, _) = node_a.get_block(&hash).unwrap();

        node_b.on_event(NetworkEvent::Block { block, peer: 1 });
        assert_eq!(node_b.best_block_hash(), hash);
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    #[test]
    fn metrics_count_blocks_and_txs() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        node.generate_to(&Script([1; 20]), 2).unwrap();
        assert_eq!(node.metrics().blocks_connected.load(Ordering::Relaxed), 2);
        assert_eq!(node.metrics().reorgs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn chain_stats_are_exposed() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir);
        node.generate_to(&Script([1; 20]), 2).unwrap();
        let stats = node.chain_stats();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.best_hash, node.best_block_hash());
    }
}
