//! Full cycle: mirrored blocks, ABI decoding, label rows.

mod common;

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::JsonAbi;
use alloy::primitives::{address, Address, Bytes, LogData, U256};
use alloy::rpc::types::Log;
use common::*;
use label_crawl::persist::DEFAULT_LABEL;
use label_crawl::{AbiExtractor, CycleOutcome, ResolverKind, Watcher};
use label_data::{BlockCache, CachedResolver, Store};
use serde_json::Value;

const RECIPIENT: Address = address!("70997970c51812e339d9b73b0245ad59e15ebbf9");

const ABI: &str = r#"[
    {"type":"function","name":"mint","stateMutability":"nonpayable","outputs":[],
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}]},
    {"type":"event","name":"Transfer","anonymous":false,
     "inputs":[{"name":"from","type":"address","indexed":true},
               {"name":"to","type":"address","indexed":true},
               {"name":"value","type":"uint256","indexed":false}]}
]"#;

fn abi() -> JsonAbi {
    serde_json::from_str(ABI).expect("abi should parse")
}

fn mint_input(amount: u64) -> Vec<u8> {
    abi().function("mint").expect("mint")[0]
        .abi_encode_input(&[
            DynSolValue::Address(RECIPIENT),
            DynSolValue::Uint(U256::from(amount), 256),
        ])
        .expect("encode")
}

fn transfer_log(block_number: u64, log_index: u64, value: u64) -> Log {
    let event = abi().event("Transfer").expect("event")[0].clone();
    Log {
        inner: alloy::primitives::Log {
            address: CONTRACT,
            data: LogData::new_unchecked(
                vec![event.selector(), Address::ZERO.into_word(), RECIPIENT.into_word()],
                Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
            ),
        },
        block_number: Some(block_number),
        transaction_hash: Some(tx_hash(block_number, 0)),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// Blocks 100..=120 mirrored; every even block carries one mint.
fn mirrored_store() -> Store {
    let store = test_store();
    for n in 100..=120 {
        store.insert_block(&sample_block(n)).expect("insert block");
        let mut txs = vec![sample_tx(n, 1, CALLER, Vec::new())];
        if n % 2 == 0 {
            txs.push(sample_tx(n, 0, CONTRACT, mint_input(n)));
        }
        store.insert_transactions(&txs).expect("insert transactions");
    }
    store
}

#[tokio::test]
async fn cached_cycle_writes_decoded_labels() {
    let store = mirrored_store();
    let rpc = ScriptedRpc::new(130);
    rpc.logs
        .borrow_mut()
        .extend([transfer_log(102, 4, 7), transfer_log(100, 9, 5), transfer_log(119, 0, 1)]);

    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());
    let source = resolver.with_store(&store);
    let extractor = AbiExtractor::new(&rpc, &abi(), CONTRACT).with_log_chunk_size(2);

    let mut config = test_config();
    config.resolver = ResolverKind::Cached;
    config.start_block = Some(100);
    let mut watcher = Watcher::start(config, &store, &rpc, &source, &extractor)
        .await
        .expect("watcher should start");

    let outcome = watcher.step().await.expect("cycle should succeed");
    assert_eq!(
        outcome,
        CycleOutcome::Advanced {
            start: 100,
            end: 105,
            calls: 3,
            events: 2,
        }
    );
    // Every block came from the store; the node only answered receipts and logs.
    assert_eq!(rpc.block_calls.get(), 0);
    assert_eq!(rpc.receipt_calls.get(), 3);

    let labels = store.labels(DEFAULT_LABEL, CONTRACT).expect("labels");
    assert_eq!(labels.len(), 5);

    let calls: Vec<Value> = labels
        .iter()
        .filter(|label| label.log_index.is_none())
        .map(|label| serde_json::from_str(&label.label_data).expect("json"))
        .collect();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0]["type"], "tx_call");
    assert_eq!(calls[0]["name"], "mint");
    assert_eq!(calls[0]["caller"], CALLER.to_checksum(None));
    assert_eq!(calls[0]["args"]["to"], RECIPIENT.to_checksum(None));
    assert_eq!(calls[0]["args"]["amount"], "100");
    assert_eq!(calls[0]["status"], 1);
    assert_eq!(calls[0]["gasUsed"], 48_000);

    let first_event = labels
        .iter()
        .find(|label| label.log_index == Some(9))
        .expect("event label");
    assert_eq!(first_event.block_number, 100);
    assert_eq!(first_event.block_timestamp, block_timestamp(100));
    let payload: Value = serde_json::from_str(&first_event.label_data).expect("json");
    assert_eq!(payload["type"], "event");
    assert_eq!(payload["name"], "Transfer");
    assert_eq!(payload["args"]["value"], "5");

    // The block 119 log sits outside the window.
    assert!(labels.iter().all(|label| label.block_number <= 105));
    assert_eq!(watcher.cursor(), 106);
}
