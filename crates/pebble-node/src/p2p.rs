//! Abstract P2P interface.
//!
//! The wire transport lives outside this workspace; the core sees it as a
//! source of [`NetworkEvent`]s and a sink for broadcasts. Inbound traffic
//! is a closed sum type delivered to [`Node::on_event`](crate::node::Node::on_event);
//! outbound traffic goes through the [`BroadcastSink`] the node was
//! constructed with. Handshakes, addressing, and retries are entirely the
//! transport's concern.

use parking_lot::Mutex;

use pebble_core::hash::Hash256;
use pebble_core::types::{Block, Transaction};

/// Opaque peer identifier assigned by the transport.
pub type PeerId = u64;

/// An inventory item a peer advertises or a node announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvItem {
    Tx(Hash256),
    Block(Hash256),
}

/// Inbound traffic from the transport.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    Tx { tx: Transaction, peer: PeerId },
    Block { block: Block, peer: PeerId },
    Inv { items: Vec<InvItem>, peer: PeerId },
}

/// Outbound callbacks into the transport.
pub trait BroadcastSink: Send + Sync {
    /// Announce items to all peers (FIFO per peer, best-effort).
    fn broadcast_inv(&self, items: &[InvItem]);

    /// Ask a specific peer for the full payloads of `items`.
    fn request(&self, items: &[InvItem], peer: PeerId);
}

/// A sink that drops everything. Used when running without a transport.
pub struct NullSink;

impl BroadcastSink for NullSink {
    fn broadcast_inv(&self, _items: &[InvItem]) {}
    fn request(&self, _items: &[InvItem], _peer: PeerId) {}
}

/// A sink that records calls, for tests.
#[derive(Default)]
pub struct RecordingSink {
    pub broadcasts: Mutex<Vec<InvItem>>,
    pub requests: Mutex<Vec<(PeerId, Vec<InvItem>)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadcastSink for RecordingSink {
    fn broadcast_inv(&self, items: &[InvItem]) {
        self.broadcasts.lock().extend_from_slice(items);
    }

    fn request(&self, items: &[InvItem], peer: PeerId) {
        self.requests.lock().push((peer, items.to_vec()));
    }
}
