//! Alloy RPC provider integration.
//!
//! `ChainRpc` is the narrow view of a node the crawler needs: head number,
//! full blocks, receipts and logs. `RpcClient` implements it over HTTP and
//! also mirrors block ranges into the store.

use alloy::consensus::Transaction as _;
use alloy::network::{Ethereum, TransactionResponse};
use alloy::primitives::B256;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::BlockNumberOrTag;
use alloy::rpc::types::{Filter, Log, Transaction};
use alloy::transports::TransportError;
use async_trait::async_trait;
use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::store::Store;
use crate::types::{ChainTransaction, ReceiptSummary, StoredBlock};

type ProviderType = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider<Ethereum>,
>;

/// A block with its transactions in call-shaped form.
pub type BlockWithTransactions = (StoredBlock, Vec<ChainTransaction>);

/// Read access to a live node.
#[async_trait(?Send)]
pub trait ChainRpc {
    /// Current head block number.
    async fn head_block_number(&self) -> Result<u64, TransportError>;

    /// A block with full transaction bodies, `None` if the node does not have it.
    async fn block_with_transactions(
        &self,
        block_number: u64,
    ) -> Result<Option<BlockWithTransactions>, TransportError>;

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<ReceiptSummary>, TransportError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError>;
}

#[async_trait(?Send)]
impl<T: ChainRpc + ?Sized> ChainRpc for &T {
    async fn head_block_number(&self) -> Result<u64, TransportError> {
        (**self).head_block_number().await
    }

    async fn block_with_transactions(
        &self,
        block_number: u64,
    ) -> Result<Option<BlockWithTransactions>, TransportError> {
        (**self).block_with_transactions(block_number).await
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<ReceiptSummary>, TransportError> {
        (**self).transaction_receipt(hash).await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError> {
        (**self).logs(filter).await
    }
}

/// Counters reported by [`RpcClient::mirror_range`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Blocks fetched and written.
    pub mirrored: u64,
    /// Blocks already in the store.
    pub skipped: u64,
    /// Blocks the node did not return.
    pub missing: u64,
    /// Blocks that failed after all retries.
    pub failed: u64,
    /// Transactions written.
    pub transactions: u64,
}

/// Fetches blocks, receipts and logs from an Ethereum RPC endpoint.
#[derive(Clone)]
pub struct RpcClient {
    /// Alloy FillProvider with gas, nonce, chain_id, blob_gas fillers
    provider: Arc<ProviderType>,
}

impl RpcClient {
    /// Creates a new client and tests RPC connectivity via `eth_blockNumber`.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or the connectivity test fails.
    ///
    /// # Example
    /// ```no_run
    /// # use label_data::rpc::RpcClient;
    /// # async fn example() -> eyre::Result<()> {
    /// let rpc = RpcClient::new("https://polygon-rpc.com").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip_all, fields(rpc_url = %rpc_url))]
    pub async fn new(rpc_url: &str) -> Result<Self> {
        let provider =
            ProviderBuilder::new().on_http(rpc_url.parse().wrap_err("invalid RPC URL format")?);
        let provider = Arc::new(provider);

        let block_number = provider
            .get_block_number()
            .await
            .wrap_err("failed to test RPC connectivity with eth_blockNumber")?;

        tracing::info!(
            rpc_url = %rpc_url,
            latest_block = block_number,
            "RPC connection successful"
        );

        Ok(Self { provider })
    }

    /// Fetches one block with full transaction bodies.
    ///
    /// Returns `Ok(None)` if the block does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_block(
        &self,
        block_number: u64,
    ) -> Result<Option<BlockWithTransactions>, TransportError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .full()
            .await?;

        let block = match block {
            Some(block) => block,
            None => {
                tracing::debug!(block_number, "block not found");
                return Ok(None);
            }
        };

        let stored = StoredBlock {
            block_number: block.header.number,
            timestamp: block.header.timestamp,
        };
        let transactions = block
            .transactions
            .as_transactions()
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(position, tx)| chain_transaction(stored.block_number, position as u64, tx))
            .collect();

        Ok(Some((stored, transactions)))
    }

    /// Mirrors `[start, end]` into the `blocks` and `transactions` tables.
    ///
    /// - Skips blocks already in the store
    /// - Limits to 10 concurrent RPC calls via `tokio::sync::Semaphore`
    /// - Retries failed blocks up to 3 times with 500ms exponential backoff
    /// - Logs missing and failed blocks but keeps going
    ///
    /// # Errors
    /// Returns error if a store write fails.
    #[tracing::instrument(skip(self, store))]
    pub async fn mirror_range(&self, start: u64, end: u64, store: &Store) -> Result<MirrorStats> {
        let semaphore = Arc::new(Semaphore::new(10));
        let progress = ProgressBar::new(end.saturating_sub(start) + 1);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks")
                .wrap_err("invalid progress bar template")?,
        );

        let mut stats = MirrorStats::default();
        let mut to_fetch = Vec::new();
        for block_number in start..=end {
            if store.has_block(block_number)? {
                stats.skipped += 1;
                progress.inc(1);
            } else {
                to_fetch.push(block_number);
            }
        }

        tracing::info!(
            start,
            end,
            blocks_to_fetch = to_fetch.len(),
            "starting block range mirror"
        );

        let mut handles = Vec::new();
        for block_number in to_fetch {
            let sem = semaphore.clone();
            let client = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.ok();
                let mut attempt = 0_u32;
                loop {
                    match client.fetch_block(block_number).await {
                        Ok(result) => return (block_number, Ok(result)),
                        Err(e) if attempt < 2 => {
                            let backoff_ms = 500 * 2_u64.pow(attempt);
                            tracing::debug!(
                                block_number,
                                attempt = attempt + 1,
                                backoff_ms,
                                error = %e,
                                "retrying failed block fetch"
                            );
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                            attempt += 1;
                        }
                        Err(e) => return (block_number, Err(e)),
                    }
                }
            }));
        }

        for handle in handles {
            let (block_number, result) = match handle.await {
                Ok(joined) => joined,
                Err(e) => {
                    tracing::error!("task join error: {}", e);
                    stats.failed += 1;
                    continue;
                }
            };
            progress.inc(1);
            match result {
                Ok(None) => {
                    tracing::warn!(block_number, "block not found in RPC");
                    stats.missing += 1;
                }
                Ok(Some((block, txs))) => {
                    let written = store.insert_block_with_transactions(&block, &txs)?;
                    stats.transactions += written as u64;
                    stats.mirrored += 1;
                }
                Err(e) => {
                    tracing::error!(block_number, "failed to fetch block after 3 attempts: {}", e);
                    stats.failed += 1;
                }
            }
        }

        progress.finish_with_message("mirror complete");
        Ok(stats)
    }
}

#[async_trait(?Send)]
impl ChainRpc for RpcClient {
    async fn head_block_number(&self) -> Result<u64, TransportError> {
        self.provider.get_block_number().await
    }

    async fn block_with_transactions(
        &self,
        block_number: u64,
    ) -> Result<Option<BlockWithTransactions>, TransportError> {
        self.fetch_block(block_number).await
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<ReceiptSummary>, TransportError> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|receipt| ReceiptSummary {
            transaction_hash: receipt.transaction_hash,
            status: receipt.status(),
            gas_used: receipt.gas_used,
        }))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError> {
        self.provider.get_logs(filter).await
    }
}

/// Maps an RPC transaction body onto the shape the store produces.
pub fn chain_transaction(block_number: u64, position: u64, tx: &Transaction) -> ChainTransaction {
    ChainTransaction {
        block_number,
        transaction_index: tx.transaction_index.unwrap_or(position),
        hash: TransactionResponse::tx_hash(tx),
        from: TransactionResponse::from(tx),
        to: alloy::consensus::Transaction::to(tx),
        input: alloy::consensus::Transaction::input(tx).clone(),
        value: alloy::consensus::Transaction::value(tx),
        gas: alloy::consensus::Transaction::gas_limit(tx),
        gas_price: alloy::consensus::Transaction::gas_price(tx),
        max_fee_per_gas: tx
            .is_dynamic_fee()
            .then(|| alloy::consensus::Transaction::max_fee_per_gas(tx)),
        max_priority_fee_per_gas: alloy::consensus::Transaction::max_priority_fee_per_gas(tx),
        nonce: alloy::consensus::Transaction::nonce(tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_requires_valid_url() {
        let result = RpcClient::new("invalid://url").await;
        assert!(result.is_err(), "should reject invalid URL");
    }
}
