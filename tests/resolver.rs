//! Integration tests for cache → store → RPC block resolution.

mod common;

use common::*;
use label_data::{BlockCache, CachedResolver, ChainSource, EvictionPolicy, RpcSource, Store};

/// Mirrors `count` blocks starting at `first`, each with one transaction to
/// the contract and one elsewhere.
fn mirrored_store(first: u64, count: u64) -> Store {
    let store = test_store();
    for n in first..first + count {
        store.insert_block(&sample_block(n)).expect("insert block");
        store
            .insert_transactions(&[
                sample_tx(n, 0, CONTRACT, vec![0x01]),
                sample_tx(n, 1, CALLER, Vec::new()),
            ])
            .expect("insert transactions");
    }
    store
}

#[tokio::test]
async fn store_miss_reads_a_batch_of_one_hundred_ahead() {
    let store = mirrored_store(0, 300);
    let rpc = ScriptedRpc::new(10_000);
    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());
    let source = resolver.with_store(&store);

    source.timestamp_of(0).await.expect("resolve");
    assert_eq!(resolver.cache().len(), 100);

    source.timestamp_of(99).await.expect("resolve");
    assert_eq!(resolver.cache().len(), 100);

    source.timestamp_of(100).await.expect("resolve");
    assert_eq!(resolver.cache().len(), 200);
    assert_eq!(rpc.block_calls.get(), 0);
}

#[tokio::test]
async fn cache_clears_wholesale_once_over_capacity() {
    let store = mirrored_store(0, 700);
    let rpc = ScriptedRpc::new(10_000);
    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());
    let source = resolver.with_store(&store);

    for n in (0..=500).step_by(100) {
        source.timestamp_of(n).await.expect("resolve");
    }
    assert_eq!(resolver.cache().len(), 600);

    source.timestamp_of(600).await.expect("resolve");
    assert_eq!(resolver.cache().len(), 100);
    assert!(!resolver.cache().contains(0));
    assert!(resolver.cache().contains(600));
}

#[tokio::test]
async fn lru_policy_stays_within_capacity() {
    let store = mirrored_store(0, 700);
    let rpc = ScriptedRpc::new(10_000);
    let resolver = CachedResolver::new(&rpc, BlockCache::new(500, EvictionPolicy::Lru));
    let source = resolver.with_store(&store);

    for n in (0..=600).step_by(100) {
        source.timestamp_of(n).await.expect("resolve");
        assert!(resolver.cache().len() <= 500);
    }
    assert!(resolver.cache().contains(600));
}

#[tokio::test]
async fn every_path_answers_the_same() {
    let store = mirrored_store(50, 10);
    let rpc = ScriptedRpc::new(10_000);
    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());

    let from_store = resolver
        .with_store(&store)
        .transactions_to(CONTRACT, 55)
        .await
        .expect("resolve");
    let from_cache = resolver
        .without_store()
        .transactions_to(CONTRACT, 55)
        .await
        .expect("resolve");
    assert_eq!(from_store, from_cache);
    assert_eq!(rpc.block_calls.get(), 0);

    let direct = RpcSource::new(&rpc);
    assert_eq!(
        direct.timestamp_of(55).await.expect("resolve"),
        resolver.without_store().timestamp_of(55).await.expect("resolve"),
    );
}

#[tokio::test]
async fn blocks_missing_from_store_fall_back_to_rpc() {
    let store = mirrored_store(50, 10);
    let rpc = ScriptedRpc::new(10_000);
    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());
    let source = resolver.with_store(&store);

    let txs = source.transactions_to(CONTRACT, 5_000).await.expect("resolve");
    assert_eq!(txs.len(), 1);
    assert_eq!(rpc.block_calls.get(), 1);

    source.transactions_to(CONTRACT, 5_000).await.expect("resolve");
    assert_eq!(rpc.block_calls.get(), 1);
}

#[tokio::test]
async fn block_unknown_everywhere_is_an_error() {
    let store = test_store();
    let rpc = ScriptedRpc::new(100);
    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());

    let err = resolver
        .with_store(&store)
        .timestamp_of(101)
        .await
        .expect_err("block should not resolve");
    assert!(matches!(
        err,
        label_data::ResolveError::ResolutionExhausted { block_number: 101 }
    ));
}

#[tokio::test]
async fn unreadable_store_falls_back_to_rpc_and_caches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("chain.sqlite");
    let path = path.to_str().expect("utf-8 path");
    let store = Store::new(path).expect("store should open");
    store
        .insert_block_with_transactions(&sample_block(50), &[sample_tx(50, 0, CONTRACT, vec![])])
        .expect("insert block");

    let raw = rusqlite::Connection::open(path).expect("raw connection");
    raw.execute_batch("DROP TABLE transactions;").expect("drop transactions");

    let rpc = ScriptedRpc::new(10_000);
    let resolver = CachedResolver::new(&rpc, BlockCache::with_defaults());
    let source = resolver.with_store(&store);

    assert_eq!(source.timestamp_of(50).await.expect("resolve"), block_timestamp(50));
    assert_eq!(rpc.block_calls.get(), 1);

    source.timestamp_of(50).await.expect("resolve");
    assert_eq!(rpc.block_calls.get(), 1);
    assert!(resolver.cache().contains(50));
}
