//! Block and transaction lookup for the crawler.
//!
//! Two sources implement [`ChainSource`]:
//!
//! - [`RpcSource`] asks the node for everything.
//! - [`StoreBackedSource`] resolves blocks through the in-memory cache, then
//!   the SQLite mirror, then the node. It is a scoped view over a
//!   [`CachedResolver`], which owns the cache and outlives any one store
//!   handle.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::error::ResolveError;
use crate::rpc::ChainRpc;
use crate::store::Store;
use crate::types::{CachedBlock, ChainTransaction, ReceiptSummary};

/// Number of consecutive blocks read from the store per miss.
pub const DEFAULT_STORE_BATCH: u64 = 100;

/// Everything the extraction engine needs to know about the chain.
#[async_trait(?Send)]
pub trait ChainSource {
    /// Timestamp of a block.
    async fn timestamp_of(&self, block_number: u64) -> Result<u64, ResolveError>;

    /// Transactions in a block sent to `address`, in block order.
    async fn transactions_to(
        &self,
        address: Address,
        block_number: u64,
    ) -> Result<Vec<ChainTransaction>, ResolveError>;

    /// Receipt of a transaction, always read from the node.
    async fn transaction_receipt(&self, hash: B256) -> Result<ReceiptSummary, ResolveError>;

    /// Highest block number the source knows about.
    async fn last_known_block_number(&self) -> Result<u64, ResolveError>;
}

fn filter_recipient(block: &CachedBlock, address: Address) -> Vec<ChainTransaction> {
    block
        .transactions
        .iter()
        .filter(|tx| tx.to == Some(address))
        .cloned()
        .collect()
}

async fn receipt_from<R: ChainRpc>(rpc: &R, hash: B256) -> Result<ReceiptSummary, ResolveError> {
    rpc.transaction_receipt(hash)
        .await?
        .ok_or(ResolveError::ReceiptNotFound(hash))
}

/// Direct-RPC source with no caching.
pub struct RpcSource<R> {
    rpc: R,
}

impl<R: ChainRpc> RpcSource<R> {
    pub fn new(rpc: R) -> Self {
        Self { rpc }
    }

    async fn block(&self, block_number: u64) -> Result<CachedBlock, ResolveError> {
        let (block, transactions) = self
            .rpc
            .block_with_transactions(block_number)
            .await?
            .ok_or(ResolveError::ResolutionExhausted { block_number })?;
        Ok(CachedBlock {
            timestamp: block.timestamp,
            transactions,
        })
    }
}

#[async_trait(?Send)]
impl<R: ChainRpc> ChainSource for RpcSource<R> {
    async fn timestamp_of(&self, block_number: u64) -> Result<u64, ResolveError> {
        Ok(self.block(block_number).await?.timestamp)
    }

    async fn transactions_to(
        &self,
        address: Address,
        block_number: u64,
    ) -> Result<Vec<ChainTransaction>, ResolveError> {
        let block = self.block(block_number).await?;
        Ok(filter_recipient(&block, address))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<ReceiptSummary, ResolveError> {
        receipt_from(&self.rpc, hash).await
    }

    async fn last_known_block_number(&self) -> Result<u64, ResolveError> {
        Ok(self.rpc.head_block_number().await?)
    }
}

/// Owns the block cache and the RPC fallback.
///
/// Hand out a [`StoreBackedSource`] per store connection with
/// [`with_store`](Self::with_store); the cache stays warm across them.
pub struct CachedResolver<R> {
    rpc: R,
    cache: RefCell<BlockCache>,
    store_batch: u64,
}

impl<R: ChainRpc> CachedResolver<R> {
    pub fn new(rpc: R, cache: BlockCache) -> Self {
        Self {
            rpc,
            cache: RefCell::new(cache),
            store_batch: DEFAULT_STORE_BATCH,
        }
    }

    /// Sets how many consecutive blocks a store miss reads ahead.
    pub fn with_store_batch(mut self, store_batch: u64) -> Self {
        self.store_batch = store_batch.max(1);
        self
    }

    /// A source that consults `store` between the cache and the node.
    pub fn with_store<'a>(&'a self, store: &'a Store) -> StoreBackedSource<'a, R> {
        StoreBackedSource {
            resolver: self,
            store: Some(store),
        }
    }

    /// A source that goes straight from the cache to the node.
    pub fn without_store(&self) -> StoreBackedSource<'_, R> {
        StoreBackedSource {
            resolver: self,
            store: None,
        }
    }

    /// Read access to the cache, for inspection.
    pub fn cache(&self) -> Ref<'_, BlockCache> {
        self.cache.borrow()
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }
}

/// Cache → store → RPC resolution scoped to one store handle.
pub struct StoreBackedSource<'a, R> {
    resolver: &'a CachedResolver<R>,
    store: Option<&'a Store>,
}

impl<R: ChainRpc> StoreBackedSource<'_, R> {
    /// Resolves a block, populating the cache on a miss.
    #[tracing::instrument(skip(self))]
    pub async fn block(&self, block_number: u64) -> Result<Arc<CachedBlock>, ResolveError> {
        if let Some(block) = self.resolver.cache.borrow_mut().get(block_number) {
            tracing::debug!("found in cache");
            return Ok(block);
        }

        if let Some(store) = self.store {
            match self.load_from_store(store, block_number) {
                Ok(Some(block)) => {
                    tracing::debug!("found in store");
                    return Ok(block);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "store lookup failed, falling back to rpc"),
            }
        }

        tracing::debug!("not found in cache or store, fetching from rpc");
        let (block, transactions) = self
            .resolver
            .rpc
            .block_with_transactions(block_number)
            .await?
            .ok_or(ResolveError::ResolutionExhausted { block_number })?;

        let entry = CachedBlock {
            timestamp: block.timestamp,
            transactions,
        };
        Ok(self.resolver.cache.borrow_mut().insert(block_number, entry))
    }

    /// Reads a forward batch starting at `block_number` and caches every block
    /// in it that has transactions.
    ///
    /// Returns `None` when the requested block is absent or has no
    /// transactions in the store.
    fn load_from_store(
        &self,
        store: &Store,
        block_number: u64,
    ) -> Result<Option<Arc<CachedBlock>>, ResolveError> {
        let blocks = store.blocks_from(block_number, self.resolver.store_batch)?;
        let last = match blocks.last() {
            Some(last) if blocks[0].block_number == block_number => last.block_number,
            _ => return Ok(None),
        };

        let timestamps: BTreeMap<u64, u64> = blocks
            .iter()
            .map(|block| (block.block_number, block.timestamp))
            .collect();

        let mut per_block: BTreeMap<u64, Vec<ChainTransaction>> = BTreeMap::new();
        for tx in store.transactions_between(block_number, last)? {
            if timestamps.contains_key(&tx.block_number) {
                per_block.entry(tx.block_number).or_default().push(tx);
            }
        }

        let requested = match per_block.remove(&block_number) {
            Some(transactions) => (block_number, transactions),
            None => return Ok(None),
        };

        // Requested block goes in last so an LRU cache cannot evict it mid-batch.
        let mut cache = self.resolver.cache.borrow_mut();
        cache.extend(
            per_block
                .into_iter()
                .chain(std::iter::once(requested))
                .map(|(number, transactions)| {
                    (
                        number,
                        CachedBlock {
                            timestamp: timestamps[&number],
                            transactions,
                        },
                    )
                }),
        );
        Ok(cache.get(block_number))
    }
}

#[async_trait(?Send)]
impl<R: ChainRpc> ChainSource for StoreBackedSource<'_, R> {
    async fn timestamp_of(&self, block_number: u64) -> Result<u64, ResolveError> {
        Ok(self.block(block_number).await?.timestamp)
    }

    async fn transactions_to(
        &self,
        address: Address,
        block_number: u64,
    ) -> Result<Vec<ChainTransaction>, ResolveError> {
        let block = self.block(block_number).await?;
        Ok(filter_recipient(&block, address))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<ReceiptSummary, ResolveError> {
        receipt_from(&self.resolver.rpc, hash).await
    }

    /// The store's highest block, or `EmptyStore` when it has none.
    ///
    /// Without a store handle this falls back to the node's head.
    async fn last_known_block_number(&self) -> Result<u64, ResolveError> {
        match self.store {
            Some(store) => store.max_block_number()?.ok_or(ResolveError::EmptyStore),
            None => Ok(self.resolver.rpc.head_block_number().await?),
        }
    }
}
