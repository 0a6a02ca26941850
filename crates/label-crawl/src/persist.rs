//! Idempotent label writes.
//!
//! Each upsert deletes the rows keyed by the incoming records and inserts the
//! fresh set inside one SQLite transaction. Replaying a batch converges to the
//! same rows.

use alloy::primitives::Address;
use label_data::store::ReplaceOutcome;
use label_data::{EventRecord, FunctionCall, LabelKind, LabelRow, Store};
use serde_json::json;

/// Namespace tag used when none is configured.
pub const DEFAULT_LABEL: &str = "moonworm";

/// Initial attempt plus one retry.
const COMMIT_ATTEMPTS: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to commit {kind} labels for {address} after {attempts} attempts")]
    CommitFailed {
        kind: LabelKind,
        address: Address,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
}

/// Label payload for a decoded function call.
pub fn call_payload(call: &FunctionCall) -> serde_json::Value {
    json!({
        "type": "tx_call",
        "name": call.function_name,
        "caller": call.caller_address.to_checksum(None),
        "args": call.function_args,
        "status": call.status.map(u8::from),
        "gasUsed": call.gas_used,
    })
}

/// Label payload for a decoded event.
pub fn event_payload(event: &EventRecord) -> serde_json::Value {
    json!({
        "type": "event",
        "name": event.event_name,
        "args": event.args,
    })
}

/// Writes labels for one namespace tag.
pub struct LabelWriter<'a> {
    store: &'a Store,
    label: String,
}

impl<'a> LabelWriter<'a> {
    pub fn new(store: &'a Store, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Replaces the call labels of `address` for every transaction in `calls`.
    ///
    /// # Errors
    /// Returns `PersistError` when the transaction fails twice; nothing from
    /// this batch is kept in that case.
    pub fn upsert_calls(
        &self,
        calls: &[FunctionCall],
        address: Address,
    ) -> Result<ReplaceOutcome, PersistError> {
        let rows: Vec<LabelRow> = calls
            .iter()
            .map(|call| LabelRow {
                block_number: call.block_number,
                transaction_hash: call.transaction_hash,
                block_timestamp: call.block_timestamp,
                log_index: None,
                label_data: call_payload(call).to_string(),
            })
            .collect();
        self.replace(LabelKind::Call, address, &rows)
    }

    /// Replaces the event labels of `address` keyed by transaction hash and
    /// log index.
    ///
    /// # Errors
    /// Returns `PersistError` when the transaction fails twice.
    pub fn upsert_events(
        &self,
        events: &[EventRecord],
        address: Address,
    ) -> Result<ReplaceOutcome, PersistError> {
        let rows: Vec<LabelRow> = events
            .iter()
            .map(|event| LabelRow {
                block_number: event.block_number,
                transaction_hash: event.transaction_hash,
                block_timestamp: event.block_timestamp,
                log_index: Some(event.log_index),
                label_data: event_payload(event).to_string(),
            })
            .collect();
        self.replace(LabelKind::Event, address, &rows)
    }

    #[tracing::instrument(skip(self, rows), fields(label = %self.label, rows = rows.len()))]
    fn replace(
        &self,
        kind: LabelKind,
        address: Address,
        rows: &[LabelRow],
    ) -> Result<ReplaceOutcome, PersistError> {
        if rows.is_empty() {
            return Ok(ReplaceOutcome::default());
        }

        let mut attempt = 1;
        loop {
            match self.store.replace_labels(&self.label, address, kind, rows) {
                Ok(outcome) => {
                    if outcome.deleted > 0 {
                        tracing::info!(deleted = outcome.deleted, "replaced existing labels");
                    }
                    return Ok(outcome);
                }
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "label commit failed, retrying");
                    attempt += 1;
                }
                Err(source) => {
                    tracing::error!(attempt, error = %source, "label commit failed, rolled back");
                    return Err(PersistError::CommitFailed {
                        kind,
                        address,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}
