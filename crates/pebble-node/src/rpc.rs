//! JSON-RPC server.
//!
//! Exposes chain, UTXO, and mempool queries plus transaction/block
//! submission over jsonrpsee. Queries return `null` (or empty collections)
//! for missing objects; mutations return structured errors carrying the
//! core error's message. Raw objects cross the boundary hex-encoded in the
//! canonical byte format.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use pebble_core::PebbleError;
use pebble_core::codec::Decodable;
use pebble_core::hash::Hash256;
use pebble_core::types::{Block, Script, Transaction};

use crate::node::{Node, TxLocation};

/// JSON representation of a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockJson {
    pub hash: String,
    pub height: u32,
    pub version: u32,
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u64,
    /// Compact difficulty bits, hex.
    pub bits: String,
    pub nonce: u32,
    pub size: usize,
    pub tx_count: usize,
    /// Transaction IDs, hex.
    pub tx: Vec<String>,
}

/// JSON representation of a transaction lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionJson {
    pub txid: String,
    pub is_coinbase: bool,
    pub vin: usize,
    pub vout: usize,
    pub size: usize,
    /// Height of the containing block; absent for mempool transactions.
    pub height: Option<u32>,
    /// Hash of the containing block; absent for mempool transactions.
    pub block_hash: Option<String>,
}

/// JSON representation of one unspent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoJson {
    pub txid: String,
    pub index: u32,
    pub value: u64,
    pub height: u32,
    pub is_coinbase: bool,
}

/// JSON representation of one mempool entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolEntryJson {
    pub txid: String,
    pub fee: u64,
    pub size: usize,
    /// Milli-sats per byte.
    pub fee_rate: u64,
    pub entry_time: u64,
}

/// JSON representation of mempool state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolInfoJson {
    pub size: usize,
    pub bytes: usize,
    pub total_fees: u64,
    pub entries: Vec<MempoolEntryJson>,
}

/// JSON representation of chain statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatsJson {
    pub height: u32,
    pub best_hash: String,
    /// Cumulative work as a 64-digit hex string.
    pub total_work: String,
    pub avg_block_time: u64,
    pub bits: String,
    pub block_count: usize,
}

/// Parse a 64-character hex string into a hash.
pub fn parse_hash(hex_str: &str) -> Result<Hash256, ErrorObjectOwned> {
    Hash256::from_hex(hex_str).ok_or_else(|| rpc_error(-8, "expected a 64-character hex hash"))
}

/// Parse a 40-character hex script/address payload.
pub fn parse_script(hex_str: &str) -> Result<Script, ErrorObjectOwned> {
    Script::from_hex(hex_str).map_err(|_| rpc_error(-5, "expected a 40-character hex address"))
}

fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn reject(e: PebbleError) -> ErrorObjectOwned {
    rpc_error(-25, &e.to_string())
}

fn block_json(block: &Block, height: u32) -> BlockJson {
    BlockJson {
        hash: block.header.hash().to_string(),
        height,
        version: block.header.version,
        prev_hash: block.header.prev_hash.to_string(),
        merkle_root: block.header.merkle_root.to_string(),
        timestamp: block.header.timestamp,
        bits: format!("{:08x}", block.header.bits),
        nonce: block.header.nonce,
        size: block.size(),
        tx_count: block.transactions.len(),
        tx: block.txids().iter().map(Hash256::to_string).collect(),
    }
}

/// The Pebble JSON-RPC interface.
#[rpc(server)]
pub trait PebbleRpc {
    /// Current best-chain height.
    #[method(name = "getblockcount")]
    async fn get_block_count(&self) -> Result<u32, ErrorObjectOwned>;

    /// Hash of the best-chain tip.
    #[method(name = "getbestblockhash")]
    async fn get_best_block_hash(&self) -> Result<String, ErrorObjectOwned>;

    /// Block by hash, or null.
    #[method(name = "getblock")]
    async fn get_block(&self, hash: String) -> Result<Option<BlockJson>, ErrorObjectOwned>;

    /// Best-chain block at a height, or null.
    #[method(name = "getblockbyheight")]
    async fn get_block_by_height(
        &self,
        height: u32,
    ) -> Result<Option<BlockJson>, ErrorObjectOwned>;

    /// Transaction by ID (mempool first, then the best chain), or null.
    #[method(name = "gettransaction")]
    async fn get_transaction(
        &self,
        txid: String,
    ) -> Result<Option<TransactionJson>, ErrorObjectOwned>;

    /// Total value locked to an address payload.
    #[method(name = "getbalance")]
    async fn get_balance(&self, address: String) -> Result<u64, ErrorObjectOwned>;

    /// Unspent outputs locked to an address payload.
    #[method(name = "listutxos")]
    async fn list_utxos(&self, address: String) -> Result<Vec<UtxoJson>, ErrorObjectOwned>;

    /// Mempool contents and totals.
    #[method(name = "getmempoolinfo")]
    async fn get_mempool_info(&self) -> Result<MempoolInfoJson, ErrorObjectOwned>;

    /// Chain statistics.
    #[method(name = "getchainstats")]
    async fn get_chain_stats(&self) -> Result<ChainStatsJson, ErrorObjectOwned>;

    /// Submit a canonical-hex transaction; returns its txid.
    #[method(name = "sendtransaction")]
    async fn send_transaction(&self, hex_data: String) -> Result<String, ErrorObjectOwned>;

    /// Submit a canonical-hex block; returns its hash.
    #[method(name = "submitblock")]
    async fn submit_block(&self, hex_data: String) -> Result<String, ErrorObjectOwned>;

    /// Mine `count` blocks paying `address`; returns the block hashes.
    #[method(name = "generatetoaddress")]
    async fn generate_to_address(
        &self,
        count: u32,
        address: String,
    ) -> Result<Vec<String>, ErrorObjectOwned>;
}

/// RPC server implementation wrapping a node handle.
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl PebbleRpcServer for RpcServerImpl {
    async fn get_block_count(&self) -> Result<u32, ErrorObjectOwned> {
        Ok(self.node.block_count())
    }

    async fn get_best_block_hash(&self) -> Result<String, ErrorObjectOwned> {
        Ok(self.node.best_block_hash().to_string())
    }

    async fn get_block(&self, hash: String) -> Result<Option<BlockJson>, ErrorObjectOwned> {
        let hash = parse_hash(&hash)?;
        Ok(self.node.get_block(&hash).map(|(block, height)| block_json(&block, height)))
    }

    async fn get_block_by_height(
        &self,
        height: u32,
    ) -> Result<Option<BlockJson>, ErrorObjectOwned> {
        Ok(self
            .node
            .get_block_by_height(height)
            .map(|(block, _)| block_json(&block, height)))
    }

    async fn get_transaction(
        &self,
        txid: String,
    ) -> Result<Option<TransactionJson>, ErrorObjectOwned> {
        let txid = parse_hash(&txid)?;
        Ok(self.node.get_tx(&txid).map(|(tx, location)| {
            let (height, block_hash) = match location {
                TxLocation::Mempool => (None, None),
                TxLocation::Chain { height, block_hash } => {
                    (Some(height), Some(block_hash.to_string()))
                }
            };
            TransactionJson {
                txid: txid.to_string(),
                is_coinbase: tx.is_coinbase,
                vin: tx.inputs.len(),
                vout: tx.outputs.len(),
                size: tx.size(),
                height,
                block_hash,
            }
        }))
    }

    async fn get_balance(&self, address: String) -> Result<u64, ErrorObjectOwned> {
        let script = parse_script(&address)?;
        Ok(self.node.balance_of(&script))
    }

    async fn list_utxos(&self, address: String) -> Result<Vec<UtxoJson>, ErrorObjectOwned> {
        let script = parse_script(&address)?;
        Ok(self
            .node
            .list_utxos(&script)
            .into_iter()
            .map(|(op, utxo)| UtxoJson {
                txid: op.txid.to_string(),
                index: op.index,
                value: utxo.output.value,
                height: utxo.height,
                is_coinbase: utxo.is_coinbase,
            })
            .collect())
    }

    async fn get_mempool_info(&self) -> Result<MempoolInfoJson, ErrorObjectOwned> {
        let stats = self.node.mempool_stats();
        let entries = self
            .node
            .mempool_snapshot()
            .into_iter()
            .map(|e| MempoolEntryJson {
                txid: e.txid.to_string(),
                fee: e.fee,
                size: e.size,
                fee_rate: e.fee_rate,
                entry_time: e.entry_time,
            })
            .collect();
        Ok(MempoolInfoJson {
            size: stats.count,
            bytes: stats.bytes,
            total_fees: stats.total_fees,
            entries,
        })
    }

    async fn get_chain_stats(&self) -> Result<ChainStatsJson, ErrorObjectOwned> {
        let stats = self.node.chain_stats();
        let mut work_be = [0u8; 32];
        stats.total_work.to_big_endian(&mut work_be);
        Ok(ChainStatsJson {
            height: stats.height,
            best_hash: stats.best_hash.to_string(),
            total_work: hex::encode(work_be),
            avg_block_time: stats.avg_block_time,
            bits: format!("{:08x}", stats.bits),
            block_count: stats.block_count,
        })
    }

    async fn send_transaction(&self, hex_data: String) -> Result<String, ErrorObjectOwned> {
        let raw = hex::decode(&hex_data).map_err(|_| rpc_error(-22, "invalid hex encoding"))?;
        let tx = Transaction::from_bytes(&raw)
            .map_err(|e| rpc_error(-22, &format!("malformed transaction: {e}")))?;
        let txid = self.node.submit_tx(tx).map_err(reject)?;
        Ok(txid.to_string())
    }

    async fn submit_block(&self, hex_data: String) -> Result<String, ErrorObjectOwned> {
        let raw = hex::decode(&hex_data).map_err(|_| rpc_error(-22, "invalid hex encoding"))?;
        let block = Block::from_bytes(&raw)
            .map_err(|e| rpc_error(-22, &format!("malformed block: {e}")))?;
        let hash = self.node.submit_block(block, None).map_err(reject)?;
        Ok(hash.to_string())
    }

    async fn generate_to_address(
        &self,
        count: u32,
        address: String,
    ) -> Result<Vec<String>, ErrorObjectOwned> {
        let script = parse_script(&address)?;
        let hashes = self.node.generate_to(&script, count).map_err(reject)?;
        Ok(hashes.iter().map(Hash256::to_string).collect())
    }
}

/// Start the JSON-RPC server on `addr`, serving the given node.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, PebbleError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| PebbleError::Storage(format!("RPC server bind failed: {e}")))?;
    let handle = server.start(RpcServerImpl::new(node).into_rpc());
    Ok(handle)
}
