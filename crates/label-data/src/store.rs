//! SQLite storage layer for mirrored chain data and crawler labels.
//!
//! `blocks` and `transactions` are written by the mirror and only read by the
//! resolver. `labels` is polymorphic: call labels carry a null `log_index`,
//! event labels a non-null one.

use alloy::hex;
use alloy::primitives::{Address, Bytes, B256, U256};
use eyre::Result;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::cell::RefCell;
use std::str::FromStr;

use crate::types::{ChainTransaction, LabelKind, LabelRow, StoredBlock, StoredLabel};

pub struct Store {
    conn: RefCell<Connection>,
}

/// Row counts touched by one `replace_labels` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub deleted: usize,
    pub inserted: usize,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: RefCell::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow_mut().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS blocks (
                block_number INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                block_number INTEGER NOT NULL,
                transaction_index INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT,
                gas INTEGER NOT NULL,
                gas_price TEXT,
                max_fee_per_gas TEXT,
                max_priority_fee_per_gas TEXT,
                nonce INTEGER NOT NULL,
                value TEXT NOT NULL,
                input TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS transactions_block_idx
                ON transactions (block_number, transaction_index);

            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                address TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                transaction_hash TEXT NOT NULL,
                block_timestamp INTEGER NOT NULL,
                log_index INTEGER,
                label_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS labels_block_idx
                ON labels (label, address, block_number);

            CREATE INDEX IF NOT EXISTS labels_transaction_idx
                ON labels (label, address, transaction_hash);
            ",
        )?;
        Ok(())
    }

    /// Insert a single block. Existing rows are left untouched.
    pub fn insert_block(&self, block: &StoredBlock) -> rusqlite::Result<()> {
        self.conn.borrow_mut().execute(
            "INSERT OR IGNORE INTO blocks (block_number, timestamp) VALUES (?, ?)",
            params![block.block_number, block.timestamp],
        )?;
        Ok(())
    }

    /// Batch insert transactions using a prepared statement and transaction.
    pub fn insert_transactions(&self, txs: &[ChainTransaction]) -> rusqlite::Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        let count = write_transactions(&tx, txs)?;
        tx.commit()?;
        Ok(count)
    }

    /// Insert a block and its transactions in one transaction, so a block
    /// row never exists without the transactions mirrored alongside it.
    pub fn insert_block_with_transactions(
        &self,
        block: &StoredBlock,
        txs: &[ChainTransaction],
    ) -> rusqlite::Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO blocks (block_number, timestamp) VALUES (?, ?)",
            params![block.block_number, block.timestamp],
        )?;
        let count = write_transactions(&tx, txs)?;
        tx.commit()?;
        Ok(count)
    }

    pub fn has_block(&self, block_number: u64) -> rusqlite::Result<bool> {
        self.conn.borrow().query_row(
            "SELECT EXISTS (SELECT 1 FROM blocks WHERE block_number = ?)",
            params![block_number],
            |row| row.get(0),
        )
    }

    /// Up to `limit` blocks with number >= `start`, ascending.
    pub fn blocks_from(&self, start: u64, limit: u64) -> rusqlite::Result<Vec<StoredBlock>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "
            SELECT block_number, timestamp FROM blocks
            WHERE block_number >= ?
            ORDER BY block_number ASC
            LIMIT ?
            ",
        )?;
        let blocks = stmt
            .query_map(params![start, limit], |row| {
                Ok(StoredBlock {
                    block_number: row.get(0)?,
                    timestamp: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(blocks)
    }

    /// All transactions with block number in `[start, end]`, ordered by block
    /// then transaction index.
    pub fn transactions_between(
        &self,
        start: u64,
        end: u64,
    ) -> rusqlite::Result<Vec<ChainTransaction>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "
            SELECT hash, block_number, transaction_index, from_address, to_address,
                   gas, gas_price, max_fee_per_gas, max_priority_fee_per_gas,
                   nonce, value, input
            FROM transactions
            WHERE block_number BETWEEN ? AND ?
            ORDER BY block_number ASC, transaction_index ASC
            ",
        )?;
        let txs = stmt
            .query_map(params![start, end], transaction_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txs)
    }

    /// Highest block number in the store, if any.
    pub fn max_block_number(&self) -> rusqlite::Result<Option<u64>> {
        self.conn
            .borrow()
            .query_row("SELECT MAX(block_number) FROM blocks", [], |row| row.get(0))
    }

    /// `(min, max, count)` over the blocks table; zeros when empty.
    pub fn block_range(&self) -> rusqlite::Result<(u64, u64, u64)> {
        self.conn.borrow().query_row(
            "SELECT COALESCE(MIN(block_number), 0), COALESCE(MAX(block_number), 0), COUNT(*) FROM blocks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
    }

    /// Highest labeled block for a tag and contract; the crawler resumes here.
    pub fn last_labeled_block(&self, tag: &str, address: Address) -> rusqlite::Result<Option<u64>> {
        self.conn.borrow().query_row(
            "SELECT MAX(block_number) FROM labels WHERE label = ? AND address = ?",
            params![tag, hex::encode_prefixed(address)],
            |row| row.get(0),
        )
    }

    /// Replace the labels keyed by `rows` in one SQLite transaction.
    ///
    /// Call labels are keyed by transaction hash, event labels by transaction
    /// hash and log index. Each row's key is deleted right before the row is
    /// inserted, so duplicate keys inside one batch keep the last row.
    pub fn replace_labels(
        &self,
        tag: &str,
        address: Address,
        kind: LabelKind,
        rows: &[LabelRow],
    ) -> rusqlite::Result<ReplaceOutcome> {
        let address = hex::encode_prefixed(address);
        let mut outcome = ReplaceOutcome::default();

        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        {
            let mut delete = match kind {
                LabelKind::Call => tx.prepare(
                    "
                    DELETE FROM labels
                    WHERE label = ?1 AND address = ?2 AND transaction_hash = ?3
                      AND log_index IS NULL
                    ",
                )?,
                LabelKind::Event => tx.prepare(
                    "
                    DELETE FROM labels
                    WHERE label = ?1 AND address = ?2 AND transaction_hash = ?3
                      AND log_index = ?4
                    ",
                )?,
            };
            let mut insert = tx.prepare(
                "
                INSERT INTO labels (
                    label, address, block_number, transaction_hash,
                    block_timestamp, log_index, label_data
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for row in rows {
                let hash = hex::encode_prefixed(row.transaction_hash);
                outcome.deleted += match kind {
                    LabelKind::Call => delete.execute(params![tag, address, hash])?,
                    LabelKind::Event => {
                        delete.execute(params![tag, address, hash, row.log_index])?
                    }
                };
                let log_index = match kind {
                    LabelKind::Call => None,
                    LabelKind::Event => row.log_index,
                };
                outcome.inserted += insert.execute(params![
                    tag,
                    address,
                    row.block_number,
                    hash,
                    row.block_timestamp,
                    log_index,
                    row.label_data,
                ])?;
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// All labels for a tag and contract, ordered by block, hash and log index.
    pub fn labels(&self, tag: &str, address: Address) -> rusqlite::Result<Vec<StoredLabel>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "
            SELECT label, address, block_number, transaction_hash, block_timestamp,
                   log_index, label_data
            FROM labels
            WHERE label = ? AND address = ?
            ORDER BY block_number ASC, transaction_hash ASC, log_index ASC
            ",
        )?;
        let labels = stmt
            .query_map(params![tag, hex::encode_prefixed(address)], stored_label)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    /// The label in the highest labeled block, if any.
    pub fn latest_label(&self, tag: &str, address: Address) -> rusqlite::Result<Option<StoredLabel>> {
        self.conn
            .borrow()
            .query_row(
                "
                SELECT label, address, block_number, transaction_hash, block_timestamp,
                       log_index, label_data
                FROM labels
                WHERE label = ? AND address = ?
                ORDER BY block_number DESC, log_index DESC
                LIMIT 1
                ",
                params![tag, hex::encode_prefixed(address)],
                stored_label,
            )
            .optional()
    }

    /// `(call labels, event labels)` for a tag and contract.
    pub fn label_counts(&self, tag: &str, address: Address) -> rusqlite::Result<(u64, u64)> {
        self.conn.borrow().query_row(
            "
            SELECT
                COALESCE(SUM(CASE WHEN log_index IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN log_index IS NOT NULL THEN 1 ELSE 0 END), 0)
            FROM labels
            WHERE label = ? AND address = ?
            ",
            params![tag, hex::encode_prefixed(address)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }
}

fn write_transactions(
    tx: &rusqlite::Transaction<'_>,
    txs: &[ChainTransaction],
) -> rusqlite::Result<usize> {
    let mut stmt = tx.prepare(
        "
        INSERT OR IGNORE INTO transactions (
            hash, block_number, transaction_index, from_address, to_address,
            gas, gas_price, max_fee_per_gas, max_priority_fee_per_gas,
            nonce, value, input
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )?;

    for t in txs {
        stmt.execute(params![
            hex::encode_prefixed(t.hash),
            t.block_number,
            t.transaction_index,
            hex::encode_prefixed(t.from),
            t.to.map(hex::encode_prefixed),
            t.gas,
            t.gas_price.map(hex_u128),
            t.max_fee_per_gas.map(hex_u128),
            t.max_priority_fee_per_gas.map(hex_u128),
            t.nonce,
            format!("0x{:x}", t.value),
            hex::encode_prefixed(&t.input),
        ])?;
    }
    Ok(txs.len())
}

fn hex_u128(value: u128) -> String {
    format!("0x{:x}", value)
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<ChainTransaction> {
    Ok(ChainTransaction {
        hash: parse_column(row, 0)?,
        block_number: row.get(1)?,
        transaction_index: row.get(2)?,
        from: parse_column(row, 3)?,
        to: parse_optional_column(row, 4)?,
        gas: row.get(5)?,
        gas_price: parse_optional_u128(row, 6)?,
        max_fee_per_gas: parse_optional_u128(row, 7)?,
        max_priority_fee_per_gas: parse_optional_u128(row, 8)?,
        nonce: row.get(9)?,
        value: parse_column::<U256>(row, 10)?,
        input: parse_column::<Bytes>(row, 11)?,
    })
}

fn stored_label(row: &Row<'_>) -> rusqlite::Result<StoredLabel> {
    Ok(StoredLabel {
        label: row.get(0)?,
        address: parse_column(row, 1)?,
        block_number: row.get(2)?,
        transaction_hash: parse_column(row, 3)?,
        block_timestamp: row.get(4)?,
        log_index: row.get(5)?,
        label_data: row.get(6)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        text.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parse_optional_u128(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u128>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        u128::from_str_radix(text.trim_start_matches("0x"), 16)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
