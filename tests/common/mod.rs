//! Shared test helpers and utilities.
//!
//! Factories for chain data and label records, plus scripted doubles for the
//! node and the extraction engine.

#![allow(dead_code)]

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use label_crawl::{ExtractError, Extractor, WatchConfig};
use label_data::rpc::BlockWithTransactions;
use label_data::{
    ChainRpc, ChainSource, ChainTransaction, EventRecord, FunctionCall, ReceiptSummary,
    StoredBlock, Store,
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::time::Duration;

pub const CONTRACT: Address = address!("dC0479CC5BbA033B3e7De9F178607150B3AbCe1f");
pub const CALLER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

/// Creates an in-memory SQLite Store.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

/// Watch config for [`CONTRACT`] with a 1 s starting interval.
pub fn test_config() -> WatchConfig {
    WatchConfig {
        sleep_interval: Duration::from_secs(1),
        ..WatchConfig::new(CONTRACT)
    }
}

/// ~12 second blocks from a fixed origin.
pub fn block_timestamp(number: u64) -> u64 {
    1_700_000_000 + number * 12
}

/// Deterministic hash for the `index`th transaction of a block.
pub fn tx_hash(block_number: u64, index: u64) -> B256 {
    B256::left_padding_from(&(block_number * 1_000 + index).to_be_bytes())
}

pub fn sample_block(number: u64) -> StoredBlock {
    StoredBlock {
        block_number: number,
        timestamp: block_timestamp(number),
    }
}

/// A transaction from [`CALLER`] to `to` carrying `input`.
pub fn sample_tx(block_number: u64, index: u64, to: Address, input: Vec<u8>) -> ChainTransaction {
    ChainTransaction {
        block_number,
        transaction_index: index,
        hash: tx_hash(block_number, index),
        from: CALLER,
        to: Some(to),
        input: Bytes::from(input),
        value: U256::ZERO,
        gas: 90_000,
        gas_price: Some(30_000_000_000),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        nonce: index,
    }
}

pub fn sample_call(block_number: u64) -> FunctionCall {
    FunctionCall {
        contract_address: CONTRACT,
        caller_address: CALLER,
        function_name: "mint".to_string(),
        function_args: json!({ "amount": block_number.to_string() }),
        transaction_hash: tx_hash(block_number, 0),
        block_number,
        block_timestamp: block_timestamp(block_number),
        gas_used: Some(48_000),
        status: Some(true),
    }
}

pub fn sample_event(block_number: u64, log_index: u64) -> EventRecord {
    EventRecord {
        event_name: "Transfer".to_string(),
        args: json!({ "value": log_index.to_string() }),
        address: CONTRACT,
        block_number,
        transaction_hash: tx_hash(block_number, 0),
        block_timestamp: block_timestamp(block_number),
        log_index,
    }
}

/// Node double with a movable head.
///
/// Every block exists and holds one transaction to [`CONTRACT`]; every
/// receipt is a success. Counts each request kind. Head reads fail while
/// `fail_head` is set.
pub struct ScriptedRpc {
    head: Cell<u64>,
    pub fail_head: Cell<bool>,
    pub head_calls: Cell<u64>,
    pub block_calls: Cell<u64>,
    pub receipt_calls: Cell<u64>,
    pub log_calls: Cell<u64>,
    pub logs: RefCell<Vec<Log>>,
}

impl ScriptedRpc {
    pub fn new(head: u64) -> Self {
        Self {
            head: Cell::new(head),
            fail_head: Cell::new(false),
            head_calls: Cell::new(0),
            block_calls: Cell::new(0),
            receipt_calls: Cell::new(0),
            log_calls: Cell::new(0),
            logs: RefCell::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.set(head);
    }

    pub fn total_calls(&self) -> u64 {
        self.head_calls.get() + self.block_calls.get() + self.receipt_calls.get() + self.log_calls.get()
    }
}

#[async_trait(?Send)]
impl ChainRpc for ScriptedRpc {
    async fn head_block_number(&self) -> Result<u64, TransportError> {
        self.head_calls.set(self.head_calls.get() + 1);
        if self.fail_head.get() {
            return Err(TransportErrorKind::custom_str("head unavailable"));
        }
        Ok(self.head.get())
    }

    async fn block_with_transactions(
        &self,
        block_number: u64,
    ) -> Result<Option<BlockWithTransactions>, TransportError> {
        self.block_calls.set(self.block_calls.get() + 1);
        if block_number > self.head.get() {
            return Ok(None);
        }
        Ok(Some((
            sample_block(block_number),
            vec![sample_tx(block_number, 0, CONTRACT, Vec::new())],
        )))
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<ReceiptSummary>, TransportError> {
        self.receipt_calls.set(self.receipt_calls.get() + 1);
        Ok(Some(ReceiptSummary {
            transaction_hash: hash,
            status: true,
            gas_used: 48_000,
        }))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError> {
        self.log_calls.set(self.log_calls.get() + 1);
        let from = filter.get_from_block().unwrap_or_default();
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        Ok(self
            .logs
            .borrow()
            .iter()
            .filter(|log| log.block_number.is_some_and(|n| n >= from && n <= to))
            .cloned()
            .collect())
    }
}

/// Extraction double: one call and two events per block, timestamps read
/// through the source. Records every range it is asked for.
#[derive(Default)]
pub struct FakeExtractor {
    pub ranges: RefCell<Vec<(u64, u64)>>,
    pub fail_events: Cell<bool>,
}

#[async_trait(?Send)]
impl Extractor for FakeExtractor {
    async fn function_calls(
        &self,
        source: &dyn ChainSource,
        start: u64,
        end: u64,
    ) -> Result<Vec<FunctionCall>, ExtractError> {
        self.ranges.borrow_mut().push((start, end));
        let mut calls = Vec::new();
        for block_number in start..=end {
            let call = sample_call(block_number);
            assert_eq!(source.timestamp_of(block_number).await?, call.block_timestamp);
            calls.push(call);
        }
        Ok(calls)
    }

    async fn events(
        &self,
        _source: &dyn ChainSource,
        start: u64,
        end: u64,
    ) -> Result<Vec<EventRecord>, ExtractError> {
        if self.fail_events.get() {
            return Err(ExtractError::Resolve(
                label_data::ResolveError::ResolutionExhausted { block_number: start },
            ));
        }
        Ok((start..=end)
            .flat_map(|block_number| [sample_event(block_number, 0), sample_event(block_number, 1)])
            .collect())
    }
}
