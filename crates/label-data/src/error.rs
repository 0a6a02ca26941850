//! Errors surfaced by chain-data resolution.

use alloy::primitives::B256;
use alloy::transports::TransportError;

/// Failure to answer a block, transaction or receipt query.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The store holds no blocks at all.
    #[error("store has no blocks")]
    EmptyStore,

    /// Cache, store and RPC all came back without the block.
    #[error("block {block_number} not found in cache, store or rpc")]
    ResolutionExhausted { block_number: u64 },

    #[error("receipt not found for transaction {0}")]
    ReceiptNotFound(B256),

    #[error("rpc request failed")]
    Rpc(#[from] TransportError),

    #[error("store query failed")]
    Store(#[from] rusqlite::Error),
}
