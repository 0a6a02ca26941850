//! label-data crate

pub mod cache;
pub mod error;
pub mod rpc;
pub mod source;
pub mod store;
pub mod types;

pub use cache::{BlockCache, EvictionPolicy};
pub use error::ResolveError;
pub use rpc::{ChainRpc, RpcClient};
pub use source::{CachedResolver, ChainSource, RpcSource, StoreBackedSource};
pub use store::Store;
pub use types::{
    CachedBlock, ChainTransaction, EventRecord, FunctionCall, LabelKind, LabelRow,
    ReceiptSummary, StoredBlock, StoredLabel,
};
