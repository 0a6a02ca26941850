//! Type definitions for chain data and label rows.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Block header fields mirrored into the `blocks` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    /// Block number.
    pub block_number: u64,
    /// Timestamp in unix seconds, as reported by the chain.
    pub timestamp: u64,
}

/// Transaction in call-shaped form.
///
/// Both the store path and the RPC path of the resolver produce this shape,
/// so downstream decoding does not care where a block came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Block number containing the transaction.
    pub block_number: u64,
    /// Position within the block.
    pub transaction_index: u64,
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient (None for contract creation).
    pub to: Option<Address>,
    /// Calldata.
    pub input: Bytes,
    /// Value in Wei.
    pub value: U256,
    /// Gas limit.
    pub gas: u64,
    /// Gas price in Wei (legacy and access-list txs).
    pub gas_price: Option<u128>,
    /// Max fee per gas in Wei (dynamic-fee txs).
    pub max_fee_per_gas: Option<u128>,
    /// Max priority fee per gas in Wei (dynamic-fee txs).
    pub max_priority_fee_per_gas: Option<u128>,
    /// Sender nonce.
    pub nonce: u64,
}

/// A resolved block as held by the in-memory cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedBlock {
    /// Timestamp in unix seconds.
    pub timestamp: u64,
    /// Transactions ordered by transaction index.
    pub transactions: Vec<ChainTransaction>,
}

/// The receipt fields the crawler needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub transaction_hash: B256,
    /// Execution status (true = success).
    pub status: bool,
    pub gas_used: u64,
}

/// A decoded contract function call.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    /// Contract the call was sent to.
    pub contract_address: Address,
    /// Transaction sender.
    pub caller_address: Address,
    /// ABI function name.
    pub function_name: String,
    /// Decoded arguments as a JSON object keyed by parameter name.
    pub function_args: serde_json::Value,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_timestamp: u64,
    /// Gas used, when a receipt was available.
    pub gas_used: Option<u64>,
    /// Execution status, when a receipt was available.
    pub status: Option<bool>,
}

/// A decoded contract event log.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    /// ABI event name.
    pub event_name: String,
    /// Decoded arguments as a JSON object keyed by parameter name.
    pub args: serde_json::Value,
    /// Emitting contract.
    pub address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub block_timestamp: u64,
    /// Log index within the block.
    pub log_index: u64,
}

/// Which half of the polymorphic labels table a row belongs to.
///
/// Call labels have a null `log_index`, event labels a non-null one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Call,
    Event,
}

impl std::fmt::Display for LabelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A label row ready to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelRow {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub block_timestamp: u64,
    /// Present for event labels only.
    pub log_index: Option<u64>,
    /// Serialized JSON payload.
    pub label_data: String,
}

/// A label row as read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredLabel {
    pub label: String,
    pub address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub block_timestamp: u64,
    pub log_index: Option<u64>,
    pub label_data: String,
}
