//! Error types for the Pebble protocol.
use thiserror::Error;

use crate::hash::Hash256;
use crate::types::OutPoint;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: need {needed} more bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },
    #[error("non-canonical varint encoding")] NonCanonicalVarInt,
    #[error("{0} trailing bytes after decoded value")] TrailingBytes(usize),
    #[error("invalid value: {0}")] InvalidValue(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    #[error("sign bit set in compact bits {0:#010x}")] NegativeMantissa(u32),
    #[error("compact bits {0:#010x} overflow a 256-bit target")] Overflow(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no outputs")] NoOutputs,
    #[error("non-coinbase transaction has no inputs")] NoInputs,
    #[error("output {index} value {value} outside [1, MAX_MONEY]")]
    OutputRange { index: usize, value: u64 },
    #[error("total output value exceeds MAX_MONEY")] OutputSumRange,
    #[error("duplicate prevout within transaction: {0}")] DoubleSpendInTx(OutPoint),
    #[error("coinbase flag inconsistent with input shape")] CoinbaseShape,
    #[error("marker prevout in non-coinbase input {0}")] MarkerPrevout(usize),
    #[error("oversized transaction: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("missing input: {0}")] MissingInput(OutPoint),
    #[error("immature coinbase spend at height {height}, spendable at {maturity_at}")]
    ImmatureCoinbase { height: u32, maturity_at: u32 },
    #[error("negative fee: inputs {inputs} < outputs {outputs}")]
    NegativeFee { inputs: u64, outputs: u64 },
    #[error("input value overflow")] ValueOverflow,
    #[error("script mismatch on input {index}")] ScriptMismatch { index: usize },
    #[error("invalid signature on input {index}")] InvalidSignature { index: usize },
    #[error("coinbase data too large: {size} > {max}")]
    CoinbaseDataTooLarge { size: usize, max: usize },
    #[error("standalone coinbase cannot be contextually validated")] StandaloneCoinbase,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("empty block (no coinbase)")] NoCoinbase,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("oversized block: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("duplicate txid: {0}")] DuplicateTxid(Hash256),
    #[error("merkle root mismatch")] MerkleMismatch,
    #[error("block hash does not meet difficulty target")] InvalidPow,
    #[error(transparent)] BadBits(#[from] DifficultyError),
    #[error("previous hash mismatch")] PrevHashMismatch,
    #[error("wrong difficulty: got {got:#010x}, expected {expected:#010x}")]
    WrongDifficulty { got: u32, expected: u32 },
    #[error("timestamp {timestamp} not after median time past {median_time_past}")]
    TimestampTooOld { timestamp: u64, median_time_past: u64 },
    #[error("timestamp {timestamp} too far in the future (limit {limit})")]
    TimestampTooFar { timestamp: u64, limit: u64 },
    #[error("double spend of {0} within block")] DoubleSpend(OutPoint),
    #[error("coinbase value {got} exceeds subsidy plus fees {max}")]
    ExcessiveReward { got: u64, max: u64 },
    #[error("transaction {index}: {source}")]
    Tx { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("unknown parent block: {0}")] UnknownParent(Hash256),
    #[error("duplicate block: {0}")] DuplicateBlock(Hash256),
    #[error("block not found: {0}")] BlockNotFound(Hash256),
    #[error("reorganization aborted at height {height}: {cause}")]
    ReorgAborted { height: u32, cause: BlockError },
    #[error("corrupted chain state: {component}")] Corrupted { component: String },
    #[error(transparent)] Block(#[from] BlockError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyPresent(Hash256),
    #[error("coinbase transactions are not relayable")] Coinbase,
    #[error("conflicts with pool transaction {existing_txid} on {outpoint}")]
    Conflict { existing_txid: Hash256, outpoint: OutPoint },
    #[error("fee rate too low: {fee_rate} < required {required} (milli-sats/byte)")]
    FeeTooLow { fee_rate: u64, required: u64 },
    #[error("mempool full")] Full,
    #[error(transparent)] Tx(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("input index out of bounds: {index} >= {len}")]
    InputIndexOutOfBounds { index: usize, len: usize },
}

#[derive(Error, Debug)]
pub enum PebbleError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error("storage: {0}")] Storage(String),
}
