//! Function-call and event extraction for one contract.
//!
//! [`Extractor`] is the seam the crawl loop drives. [`AbiExtractor`] decodes
//! against a JSON ABI: calls come from transactions sent to the contract,
//! events from `eth_getLogs` per event signature.

use alloy::dyn_abi::{DynSolValue, EventExt, JsonAbiExt};
use alloy::json_abi::{Event, Function, JsonAbi};
use alloy::primitives::{Address, Selector};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::TransportError;
use async_trait::async_trait;
use label_data::{ChainRpc, ChainSource, ChainTransaction, EventRecord, FunctionCall, ResolveError};
use std::collections::HashMap;

use crate::config::DEFAULT_LOG_CHUNK_SIZE;
use crate::decode::{event_args, function_args};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("log query for {event} over [{start}, {end}] failed")]
    Logs {
        event: String,
        start: u64,
        end: u64,
        #[source]
        source: TransportError,
    },
}

/// Turns a block range into decoded calls and events.
#[async_trait(?Send)]
pub trait Extractor {
    /// Calls to the contract in `[start, end]`, in block and transaction order.
    async fn function_calls(
        &self,
        source: &dyn ChainSource,
        start: u64,
        end: u64,
    ) -> Result<Vec<FunctionCall>, ExtractError>;

    /// Events emitted by the contract in `[start, end]`, ordered by block and
    /// log index.
    async fn events(
        &self,
        source: &dyn ChainSource,
        start: u64,
        end: u64,
    ) -> Result<Vec<EventRecord>, ExtractError>;
}

pub struct AbiExtractor<R> {
    rpc: R,
    address: Address,
    functions: HashMap<Selector, Function>,
    events: Vec<Event>,
    log_chunk_size: u64,
}

impl<R: ChainRpc> AbiExtractor<R> {
    /// Anonymous events are skipped; they have no signature topic to filter on.
    pub fn new(rpc: R, abi: &JsonAbi, address: Address) -> Self {
        Self {
            rpc,
            address,
            functions: abi
                .functions()
                .map(|function| (function.selector(), function.clone()))
                .collect(),
            events: abi.events().filter(|event| !event.anonymous).cloned().collect(),
            log_chunk_size: DEFAULT_LOG_CHUNK_SIZE,
        }
    }

    pub fn with_log_chunk_size(mut self, log_chunk_size: u64) -> Self {
        self.log_chunk_size = log_chunk_size.max(1);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn decode_call<'f>(&'f self, tx: &ChainTransaction) -> Option<(&'f Function, Vec<DynSolValue>)> {
        if tx.input.len() < 4 {
            return None;
        }
        let function = self.functions.get(&Selector::from_slice(&tx.input[..4]))?;
        match function.abi_decode_input(&tx.input[4..], true) {
            Ok(values) => Some((function, values)),
            Err(e) => {
                tracing::warn!(
                    transaction_hash = %tx.hash,
                    function = %function.name,
                    error = %e,
                    "failed to decode call input"
                );
                None
            }
        }
    }

    async fn decode_logs(
        &self,
        source: &dyn ChainSource,
        event: &Event,
        logs: Vec<Log>,
    ) -> Result<Vec<EventRecord>, ExtractError> {
        let mut records = Vec::with_capacity(logs.len());
        for log in logs {
            let (Some(block_number), Some(transaction_hash), Some(log_index)) =
                (log.block_number, log.transaction_hash, log.log_index)
            else {
                tracing::warn!(event = %event.name, "skipping log without block position");
                continue;
            };
            let decoded = match event.decode_log(&log.inner.data, true) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(
                        event = %event.name,
                        %transaction_hash,
                        log_index,
                        error = %e,
                        "failed to decode log"
                    );
                    continue;
                }
            };
            records.push(EventRecord {
                event_name: event.name.clone(),
                args: event_args(event, &decoded.indexed, &decoded.body),
                address: log.inner.address,
                block_number,
                transaction_hash,
                block_timestamp: source.timestamp_of(block_number).await?,
                log_index,
            });
        }
        Ok(records)
    }
}

#[async_trait(?Send)]
impl<R: ChainRpc> Extractor for AbiExtractor<R> {
    #[tracing::instrument(skip(self, source), fields(address = %self.address))]
    async fn function_calls(
        &self,
        source: &dyn ChainSource,
        start: u64,
        end: u64,
    ) -> Result<Vec<FunctionCall>, ExtractError> {
        let mut calls = Vec::new();
        for block_number in start..=end {
            let transactions = source.transactions_to(self.address, block_number).await?;
            if transactions.is_empty() {
                continue;
            }
            let block_timestamp = source.timestamp_of(block_number).await?;

            for tx in &transactions {
                let Some((function, values)) = self.decode_call(tx) else {
                    continue;
                };
                let (status, gas_used) = match source.transaction_receipt(tx.hash).await {
                    Ok(receipt) => (Some(receipt.status), Some(receipt.gas_used)),
                    Err(ResolveError::ReceiptNotFound(hash)) => {
                        tracing::warn!(transaction_hash = %hash, "receipt not found");
                        (None, None)
                    }
                    Err(e) => return Err(e.into()),
                };
                calls.push(FunctionCall {
                    contract_address: self.address,
                    caller_address: tx.from,
                    function_name: function.name.clone(),
                    function_args: function_args(&function.inputs, &values),
                    transaction_hash: tx.hash,
                    block_number,
                    block_timestamp,
                    gas_used,
                    status,
                });
            }
        }
        tracing::debug!(calls = calls.len(), "decoded function calls");
        Ok(calls)
    }

    #[tracing::instrument(skip(self, source), fields(address = %self.address))]
    async fn events(
        &self,
        source: &dyn ChainSource,
        start: u64,
        end: u64,
    ) -> Result<Vec<EventRecord>, ExtractError> {
        let mut records = Vec::new();
        for event in &self.events {
            let mut from = start;
            while from <= end {
                let to = end.min(from.saturating_add(self.log_chunk_size - 1));
                let filter = Filter::new()
                    .address(self.address)
                    .event_signature(event.selector())
                    .from_block(from)
                    .to_block(to);
                let logs = self
                    .rpc
                    .logs(&filter)
                    .await
                    .map_err(|source| ExtractError::Logs {
                        event: event.name.clone(),
                        start: from,
                        end: to,
                        source,
                    })?;
                records.extend(self.decode_logs(source, event, logs).await?);

                match to.checked_add(1) {
                    Some(next) => from = next,
                    None => break,
                }
            }
        }
        records.sort_by_key(|record| (record.block_number, record.log_index));
        tracing::debug!(events = records.len(), "decoded events");
        Ok(records)
    }
}
