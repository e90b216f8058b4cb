//! Core protocol types: transactions, blocks, UTXOs.
//!
//! All monetary values are in sats (1 PBL = 10^8 sats). Heights are `u32`,
//! timestamps are Unix seconds as `u64`.
//!
//! Each type carries a canonical byte encoding (see [`crate::codec`]) used
//! for hashing, wire transfer, and size accounting. Transaction IDs are raw
//! 32-byte digests carried uniformly through hashing, merkle commitments,
//! and persistence; hex appears only at display boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{self, Decodable, Encodable, Reader};
use crate::constants::COINBASE_MATURITY;
use crate::error::CodecError;
use crate::hash::{Hash256, dsha256};

/// Reference to a specific output of a previous transaction.
///
/// Totally ordered so it can serve as a map key.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// Output index reserved for the coinbase marker.
    pub const COINBASE_INDEX: u32 = u32::MAX;

    /// The coinbase marker outpoint (`txid = 0`, `index = u32::MAX`).
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: Self::COINBASE_INDEX,
        }
    }

    /// Check if this is the coinbase marker.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == Self::COINBASE_INDEX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl Encodable for OutPoint {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.txid.as_bytes());
        buf.extend_from_slice(&self.index.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let txid = Hash256(r.read_array::<32>()?);
        let index = r.read_u32()?;
        Ok(Self { txid, index })
    }
}

/// A P2PKH locking script: the 20-byte `hash160` of the owner's public key.
///
/// Richer scripting is deliberately absent; an output is spendable by
/// whoever presents a public key hashing to this payload plus a valid
/// signature.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct Script(pub [u8; 20]);

impl Script {
    pub const LEN: usize = 20;

    /// A provably unspendable all-zero script, used by the genesis coinbase.
    pub fn burn() -> Self {
        Self([0u8; 20])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s)
            .map_err(|_| CodecError::InvalidValue("script is not valid hex".into()))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidValue("script must be 20 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxIn {
    /// The outpoint being spent. The marker outpoint for coinbase.
    pub prevout: OutPoint,
    /// Ed25519 signature (64 bytes). Arbitrary data for coinbase inputs.
    pub signature: Vec<u8>,
    /// Ed25519 public key (32 bytes). Empty for coinbase inputs.
    pub pubkey: Vec<u8>,
}

impl Encodable for TxIn {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.prevout.encode(buf);
        codec::write_varbytes(buf, &self.signature);
        codec::write_varbytes(buf, &self.pubkey);
    }
}

impl Decodable for TxIn {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            prevout: OutPoint::decode(r)?,
            signature: r.read_varbytes()?,
            pubkey: r.read_varbytes()?,
        })
    }
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOut {
    /// Value in sats.
    pub value: u64,
    /// P2PKH locking script of the recipient.
    pub script: Script,
}

impl Encodable for TxOut {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        codec::write_varbytes(buf, &self.script.0);
    }
}

impl Decodable for TxOut {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let value = r.read_u64()?;
        let script_bytes = r.read_varbytes()?;
        let arr: [u8; 20] = script_bytes
            .try_into()
            .map_err(|_| CodecError::InvalidValue("script must be 20 bytes".into()))?;
        Ok(Self { value, script: Script(arr) })
    }
}

/// A transaction transferring value between scripts.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Whether this is a coinbase transaction. Must be consistent with the
    /// input shape (exactly one marker input); stateless validation rejects
    /// mismatches.
    pub is_coinbase: bool,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxIn>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Compute the transaction ID: double SHA-256 over the canonical bytes.
    pub fn txid(&self) -> Hash256 {
        dsha256(&self.to_bytes())
    }

    /// Whether the input shape matches the coinbase form: exactly one input
    /// carrying the marker prevout.
    pub fn has_coinbase_shape(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of all output values. `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Canonical serialized size in bytes.
    pub fn size(&self) -> usize {
        self.encoded_len()
    }
}

impl Encodable for Transaction {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.is_coinbase as u8);
        codec::write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode(buf);
        }
        codec::write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(buf);
        }
    }
}

impl Decodable for Transaction {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let flag = r.read_u8()?;
        let is_coinbase = match flag {
            0 => false,
            1 => true,
            other => {
                return Err(CodecError::InvalidValue(format!(
                    "coinbase flag must be 0 or 1, got {other}"
                )));
            }
        };
        let input_count = r.read_varint()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            inputs.push(TxIn::decode(r)?);
        }
        let output_count = r.read_varint()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            outputs.push(TxOut::decode(r)?);
        }
        Ok(Self { is_coinbase, inputs, outputs })
    }
}

/// Block header containing the proof-of-work puzzle.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u32,
    /// Hash of the previous block header. Zero for genesis.
    pub prev_hash: Hash256,
    /// Double-SHA256 merkle root over the block's transaction IDs.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Compact-bits difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Canonical header size: 4 + 32 + 32 + 8 + 4 + 4.
    pub const ENCODED_LEN: usize = 84;

    /// Compute the block header hash: double SHA-256 over the canonical bytes.
    pub fn hash(&self) -> Hash256 {
        dsha256(&self.to_bytes())
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl Decodable for BlockHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: r.read_u32()?,
            prev_hash: Hash256(r.read_array::<32>()?),
            merkle_root: Hash256(r.read_array::<32>()?),
            timestamp: r.read_u64()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered transactions. The first must be the only coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Transaction IDs in block order.
    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::txid).collect()
    }

    /// Canonical serialized size in bytes.
    pub fn size(&self) -> usize {
        self.encoded_len()
    }
}

impl Encodable for Block {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.header.encode(buf);
        codec::write_varint(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode(buf);
        }
    }
}

impl Decodable for Block {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let header = BlockHeader::decode(r)?;
        let tx_count = r.read_varint()?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024) as usize);
        for _ in 0..tx_count {
            transactions.push(Transaction::decode(r)?);
        }
        Ok(Self { header, transactions })
    }
}

/// An entry in the unspent transaction output set.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Utxo {
    /// The unspent output.
    pub output: TxOut,
    /// Height of the block that created this output.
    pub height: u32,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
}

impl Utxo {
    /// Whether this output may be spent at `current_height`.
    ///
    /// Coinbase outputs require [`COINBASE_MATURITY`] confirmations;
    /// everything else is always spendable.
    pub fn is_spendable(&self, current_height: u32) -> bool {
        if !self.is_coinbase {
            return true;
        }
        current_height.saturating_sub(self.height) >= COINBASE_MATURITY
    }

    /// First height at which this output becomes spendable.
    pub fn maturity_height(&self) -> u32 {
        if self.is_coinbase {
            self.height.saturating_add(COINBASE_MATURITY)
        } else {
            self.height
        }
    }
}
