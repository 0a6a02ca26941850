//! Watch configuration and its validation.

use alloy::primitives::Address;
use label_data::cache::DEFAULT_BLOCK_CACHE_CAPACITY;
use label_data::source::DEFAULT_STORE_BATCH;
use label_data::EvictionPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::persist::DEFAULT_LABEL;
use crate::window::{DEFAULT_BATCH_SIZE, DEFAULT_CONFIRMATIONS};

/// Blocks per `eth_getLogs` request when fetching events.
pub const DEFAULT_LOG_CHUNK_SIZE: u64 = 1_000;

/// Which chain source feeds the extraction engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Every lookup goes to the node.
    #[default]
    Rpc,
    /// Cache, then the SQLite mirror, then the node.
    Cached,
}

impl std::str::FromStr for ResolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpc" => Ok(Self::Rpc),
            "cached" => Ok(Self::Cached),
            other => Err(format!("unknown resolver: {other}")),
        }
    }
}

/// Rejected configuration, caught before any I/O.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("start block must be specified if force start is set")]
    ForceStartWithoutStartBlock,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("log chunk size must be at least 1")]
    ZeroLogChunkSize,

    #[error("block cache capacity must be at least 1")]
    ZeroCacheCapacity,

    #[error("invalid sleep bounds: min {min:?}, max {max:?}")]
    InvalidSleepBounds { min: Duration, max: Duration },
}

/// Everything the crawl loop needs to know about one contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Contract whose calls and events are labeled.
    pub contract_address: Address,
    /// Namespace tag written to every label row.
    pub label: String,
    /// Blocks kept between the crawl window and the chain head.
    pub confirmations: u64,
    /// Initial sleep between cycles.
    pub sleep_interval: Duration,
    /// Lower bound for the adaptive sleep.
    pub min_sleep: Duration,
    /// Upper bound for the adaptive sleep.
    pub max_sleep: Duration,
    /// Explicit first block to crawl.
    pub start_block: Option<u64>,
    /// Honor `start_block` even when it is behind the stored cursor.
    pub force_start: bool,
    /// A window spans `[cursor, cursor + batch_size]`.
    pub batch_size: u64,
    pub log_chunk_size: u64,
    pub resolver: ResolverKind,
    pub cache_capacity: usize,
    pub eviction: EvictionPolicy,
    /// Blocks read ahead from the store on a cache miss.
    pub store_batch: u64,
}

impl WatchConfig {
    /// Defaults for everything but the contract.
    pub fn new(contract_address: Address) -> Self {
        Self {
            contract_address,
            label: DEFAULT_LABEL.to_string(),
            confirmations: DEFAULT_CONFIRMATIONS,
            sleep_interval: Duration::from_secs(1),
            min_sleep: Duration::from_millis(100),
            max_sleep: Duration::from_secs(60),
            start_block: None,
            force_start: false,
            batch_size: DEFAULT_BATCH_SIZE,
            log_chunk_size: DEFAULT_LOG_CHUNK_SIZE,
            resolver: ResolverKind::default(),
            cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
            eviction: EvictionPolicy::default(),
            store_batch: DEFAULT_STORE_BATCH,
        }
    }

    /// Checks the configuration without touching the chain or the store.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.force_start && self.start_block.is_none() {
            return Err(ConfigError::ForceStartWithoutStartBlock);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.log_chunk_size == 0 {
            return Err(ConfigError::ZeroLogChunkSize);
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if self.min_sleep.is_zero() || self.min_sleep > self.max_sleep {
            return Err(ConfigError::InvalidSleepBounds {
                min: self.min_sleep,
                max: self.max_sleep,
            });
        }
        Ok(())
    }
}
