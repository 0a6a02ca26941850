//! The crawl loop.
//!
//! One [`Watcher`] follows one contract: it resumes from the highest labeled
//! block, then repeatedly asks the confirmation window for a range, extracts
//! calls and events from it, persists them and advances. The cursor only moves
//! after both label kinds are committed.

use alloy::primitives::Address;
use alloy::transports::TransportError;
use label_data::{ChainRpc, ChainSource, ResolveError, Store};
use std::time::Duration;

use crate::backoff::Backoff;
use crate::config::{ConfigError, ResolverKind, WatchConfig};
use crate::extract::{ExtractError, Extractor};
use crate::persist::{LabelWriter, PersistError};
use crate::window::{ConfirmationWindow, Window};

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("rpc request failed")]
    Rpc(#[from] TransportError),

    #[error("store query failed")]
    Store(#[from] rusqlite::Error),
}

/// What a single cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Head is still within the confirmation depth of the cursor.
    Stalled { cursor: u64, head: u64 },
    /// `[start, end]` was labeled and the cursor moved to `end + 1`.
    Advanced {
        start: u64,
        end: u64,
        calls: usize,
        events: usize,
    },
}

/// First block to crawl.
///
/// An explicit start block wins unless it is behind the stored cursor and
/// `force_start` is off. Without one the stored cursor is used, or
/// `head - 2 * confirmations` on a fresh store.
///
/// # Errors
/// `ForceStartWithoutStartBlock` when `force_start` is set alone.
pub fn resume_cursor(
    start_block: Option<u64>,
    force_start: bool,
    last_crawled: Option<u64>,
    head: u64,
    confirmations: u64,
) -> Result<u64, ConfigError> {
    match (start_block, last_crawled) {
        (None, _) if force_start => Err(ConfigError::ForceStartWithoutStartBlock),
        (Some(start), Some(last)) if start < last && !force_start => {
            tracing::info!(
                start_block = start,
                last_crawled = last,
                "start block is behind the stored cursor, resuming from the cursor"
            );
            Ok(last)
        }
        (Some(start), _) => Ok(start),
        (None, Some(last)) => Ok(last),
        (None, None) => Ok(head.saturating_sub(confirmations.saturating_mul(2))),
    }
}

pub struct Watcher<'a> {
    config: WatchConfig,
    rpc: &'a dyn ChainRpc,
    source: &'a dyn ChainSource,
    extractor: &'a dyn Extractor,
    writer: LabelWriter<'a>,
    window: ConfirmationWindow,
    backoff: Backoff,
    cursor: u64,
}

impl<'a> Watcher<'a> {
    /// Validates `config`, then reads the stored cursor and the chain head to
    /// pick the first block.
    ///
    /// Nothing touches the node or the store when the configuration is
    /// rejected. With the cached resolver an empty block store is fatal.
    ///
    /// # Errors
    /// Returns `CrawlError::Config` for invalid configuration and the
    /// underlying error for failed startup reads.
    #[tracing::instrument(skip_all, fields(address = %config.contract_address, label = %config.label))]
    pub async fn start(
        config: WatchConfig,
        store: &'a Store,
        rpc: &'a dyn ChainRpc,
        source: &'a dyn ChainSource,
        extractor: &'a dyn Extractor,
    ) -> Result<Self, CrawlError> {
        config.validate()?;

        if config.resolver == ResolverKind::Cached {
            let last_known = source.last_known_block_number().await?;
            tracing::info!(last_known, "block store is ready");
        }

        let last_crawled = store.last_labeled_block(&config.label, config.contract_address)?;
        let head = rpc.head_block_number().await?;
        let cursor = resume_cursor(
            config.start_block,
            config.force_start,
            last_crawled,
            head,
            config.confirmations,
        )?;
        tracing::info!(cursor, head, ?last_crawled, "resuming crawl");

        Ok(Self {
            window: ConfirmationWindow::new(config.confirmations, config.batch_size),
            backoff: Backoff::from_config(&config),
            writer: LabelWriter::new(store, config.label.clone()),
            config,
            rpc,
            source,
            extractor,
            cursor,
        })
    }

    /// Next block to crawl.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Sleep before the next cycle.
    pub fn sleep_interval(&self) -> Duration {
        self.backoff.current()
    }

    pub fn address(&self) -> Address {
        self.config.contract_address
    }

    /// Runs one cycle without sleeping.
    ///
    /// A stalled window or a failed cycle doubles the sleep interval and keeps
    /// the cursor; a committed range halves it and moves the cursor past the
    /// range.
    ///
    /// # Errors
    /// Any failure while reading the head, extracting or persisting.
    pub async fn step(&mut self) -> Result<CycleOutcome, CrawlError> {
        let outcome = self.cycle().await;
        if outcome.is_err() {
            self.backoff.stalled();
        }
        outcome
    }

    /// Steps and sleeps until the process is stopped. Failed cycles are logged
    /// and retried over the same range.
    pub async fn run(&mut self) {
        loop {
            if let Err(e) = self.step().await {
                tracing::warn!(
                    error = %e,
                    address = %self.config.contract_address,
                    cursor = self.cursor,
                    sleep_ms = self.backoff.current().as_millis() as u64,
                    "cycle failed, retrying"
                );
            }
            tokio::time::sleep(self.backoff.current()).await;
        }
    }

    #[tracing::instrument(skip(self), fields(address = %self.config.contract_address, cursor = self.cursor))]
    async fn cycle(&mut self) -> Result<CycleOutcome, CrawlError> {
        let head = self.rpc.head_block_number().await?;

        let (start, end) = match self.window.next(self.cursor, head) {
            Window::Ready { start, end } => (start, end),
            Window::Stalled => {
                let interval = self.backoff.stalled();
                tracing::warn!(
                    head,
                    confirmations = self.config.confirmations,
                    sleep_ms = interval.as_millis() as u64,
                    "waiting for confirmations"
                );
                return Ok(CycleOutcome::Stalled {
                    cursor: self.cursor,
                    head,
                });
            }
        };

        match self.label_range(start, end).await {
            Ok((calls, events)) => {
                let interval = self.backoff.progressed();
                self.cursor = end + 1;
                tracing::info!(
                    start,
                    end,
                    calls,
                    events,
                    sleep_ms = interval.as_millis() as u64,
                    "labeled range"
                );
                Ok(CycleOutcome::Advanced {
                    start,
                    end,
                    calls,
                    events,
                })
            }
            Err(e) => {
                tracing::error!(
                    start,
                    end,
                    address = %self.config.contract_address,
                    error = %e,
                    "failed to label range"
                );
                Err(e)
            }
        }
    }

    async fn label_range(&self, start: u64, end: u64) -> Result<(usize, usize), CrawlError> {
        let address = self.config.contract_address;

        let calls = self.extractor.function_calls(self.source, start, end).await?;
        self.writer.upsert_calls(&calls, address)?;

        let events = self.extractor.events(self.source, start, end).await?;
        self.writer.upsert_events(&events, address)?;

        Ok((calls.len(), events.len()))
    }
}
