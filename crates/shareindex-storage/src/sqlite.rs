//! SQLite storage backend for ShareIndex.
//!
//! Persists checkpoints, raw events and derived state to a single SQLite
//! file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use shareindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./shareindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::U256;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use shareindex_core::checkpoint::{Checkpoint, CheckpointStore};
use shareindex_core::error::IndexerError;
use shareindex_core::store::{IndexStore, StoreTx};
use shareindex_core::types::{
    CorporateAction, RawEvent, ShareholderBalance, TransactionRecord, TxKind,
};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checkpoints (
        key        TEXT    PRIMARY KEY,
        value      TEXT    NOT NULL,
        updated_at INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS raw_events (
        block_number    INTEGER NOT NULL,
        log_index       INTEGER NOT NULL,
        event_kind      TEXT    NOT NULL,
        contract        TEXT    NOT NULL,
        topics_json     TEXT    NOT NULL,
        data            TEXT    NOT NULL,
        block_timestamp INTEGER,
        tx_hash         TEXT,
        PRIMARY KEY (block_number, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS transactions (
        block_number    INTEGER NOT NULL,
        log_index       INTEGER NOT NULL,
        tx_hash         TEXT,
        from_address    TEXT,
        to_address      TEXT    NOT NULL,
        amount          TEXT    NOT NULL,
        block_timestamp INTEGER,
        kind            TEXT    NOT NULL,
        PRIMARY KEY (block_number, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS corporate_actions (
        block_number    INTEGER NOT NULL,
        log_index       INTEGER NOT NULL,
        action_id       TEXT    NOT NULL,
        action_kind     TEXT    NOT NULL,
        payload         TEXT    NOT NULL,
        block_timestamp INTEGER,
        PRIMARY KEY (block_number, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS shareholder_balances (
        address            TEXT    PRIMARY KEY,
        balance            TEXT    NOT NULL,
        effective_balance  TEXT    NOT NULL,
        last_updated_block INTEGER NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_raw_events_kind ON raw_events (event_kind);",
    "CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions (to_address);",
    "CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions (from_address);",
];

/// SQLite-backed storage for checkpoints, raw events and derived state.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./shareindex.db"`) or a full
    /// SQLite URL (`"sqlite:./shareindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to a single long-lived connection, since every connection to
    /// `sqlite::memory:` sees its own database. All data is lost when the
    /// pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

// ─── Checkpoints ──────────────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query("SELECT key, value, updated_at FROM checkpoints WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| -> Result<Checkpoint, IndexerError> {
            Ok(Checkpoint {
                key: r.try_get("key").map_err(storage_err)?,
                value: r.try_get("value").map_err(storage_err)?,
                updated_at: r.try_get("updated_at").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO checkpoints (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(&checkpoint.key)
            .bind(&checkpoint.value)
            .bind(checkpoint.updated_at)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(key = %checkpoint.key, value = %checkpoint.value, "checkpoint saved to SQLite");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Reads ────────────────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStorage {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, IndexerError> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn raw_events(&self) -> Result<Vec<RawEvent>, IndexerError> {
        sqlx::query(
            "SELECT block_number, log_index, event_kind, contract, topics_json, data,
                    block_timestamp, tx_hash
             FROM raw_events ORDER BY block_number, log_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(raw_event_from_row)
        .collect()
    }

    async fn transactions(&self) -> Result<Vec<TransactionRecord>, IndexerError> {
        sqlx::query(
            "SELECT block_number, log_index, tx_hash, from_address, to_address, amount,
                    block_timestamp, kind
             FROM transactions ORDER BY block_number, log_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(transaction_from_row)
        .collect()
    }

    async fn corporate_actions(&self) -> Result<Vec<CorporateAction>, IndexerError> {
        sqlx::query(
            "SELECT block_number, log_index, action_id, action_kind, payload, block_timestamp
             FROM corporate_actions ORDER BY block_number, log_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(corporate_action_from_row)
        .collect()
    }

    async fn balances(&self) -> Result<Vec<ShareholderBalance>, IndexerError> {
        sqlx::query(
            "SELECT address, balance, effective_balance, last_updated_block
             FROM shareholder_balances ORDER BY address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(balance_from_row)
        .collect()
    }

    async fn balance(&self, address: &str) -> Result<Option<ShareholderBalance>, IndexerError> {
        sqlx::query(
            "SELECT address, balance, effective_balance, last_updated_block
             FROM shareholder_balances WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .as_ref()
        .map(balance_from_row)
        .transpose()
    }
}

// ─── Writes ───────────────────────────────────────────────────────────────────

struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn insert_raw_event(&mut self, event: &RawEvent) -> Result<bool, IndexerError> {
        let topics = serde_json::to_string(&event.topics)
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO raw_events
             (block_number, log_index, event_kind, contract, topics_json, data, block_timestamp, tx_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.block_number as i64)
        .bind(event.log_index as i64)
        .bind(&event.event_kind)
        .bind(&event.contract)
        .bind(topics)
        .bind(&event.data)
        .bind(event.block_timestamp)
        .bind(&event.tx_hash)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO transactions
             (block_number, log_index, tx_hash, from_address, to_address, amount, block_timestamp, kind)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tx.block_number as i64)
        .bind(tx.log_index as i64)
        .bind(&tx.tx_hash)
        .bind(&tx.from)
        .bind(&tx.to)
        .bind(tx.amount.to_string())
        .bind(tx.block_timestamp)
        .bind(tx.kind.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_corporate_action(
        &mut self,
        action: &CorporateAction,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO corporate_actions
             (block_number, log_index, action_id, action_kind, payload, block_timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(action.block_number as i64)
        .bind(action.log_index as i64)
        .bind(&action.action_id)
        .bind(&action.action_kind)
        .bind(&action.payload)
        .bind(action.block_timestamp)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_balance(&mut self, balance: &ShareholderBalance) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO shareholder_balances (address, balance, effective_balance, last_updated_block)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                balance            = excluded.balance,
                effective_balance  = excluded.effective_balance,
                last_updated_block = excluded.last_updated_block",
        )
        .bind(&balance.address)
        .bind(balance.balance.to_string())
        .bind(balance.effective_balance.to_string())
        .bind(balance.last_updated_block as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn balances(&mut self) -> Result<Vec<ShareholderBalance>, IndexerError> {
        sqlx::query(
            "SELECT address, balance, effective_balance, last_updated_block
             FROM shareholder_balances ORDER BY address",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_err)?
        .iter()
        .map(balance_from_row)
        .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        self.tx.commit().await.map_err(storage_err)?;
        debug!("SQLite transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexerError> {
        self.tx.rollback().await.map_err(storage_err)?;
        debug!("SQLite transaction rolled back");
        Ok(())
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn u64_col(row: &SqliteRow, column: &str) -> Result<u64, IndexerError> {
    let value: i64 = row.try_get(column).map_err(storage_err)?;
    u64::try_from(value)
        .map_err(|_| IndexerError::Storage(format!("negative value in column '{column}'")))
}

fn u256_col(row: &SqliteRow, column: &str) -> Result<U256, IndexerError> {
    let text: String = row.try_get(column).map_err(storage_err)?;
    text.parse::<U256>()
        .map_err(|e| IndexerError::Storage(format!("bad amount '{text}' in '{column}': {e}")))
}

fn raw_event_from_row(row: &SqliteRow) -> Result<RawEvent, IndexerError> {
    let topics_json: String = row.try_get("topics_json").map_err(storage_err)?;
    Ok(RawEvent {
        event_kind: row.try_get("event_kind").map_err(storage_err)?,
        contract: row.try_get("contract").map_err(storage_err)?,
        topics: serde_json::from_str(&topics_json)
            .map_err(|e| IndexerError::Storage(e.to_string()))?,
        data: row.try_get("data").map_err(storage_err)?,
        block_number: u64_col(row, "block_number")?,
        log_index: u64_col(row, "log_index")?,
        block_timestamp: row.try_get("block_timestamp").map_err(storage_err)?,
        tx_hash: row.try_get("tx_hash").map_err(storage_err)?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<TransactionRecord, IndexerError> {
    let kind: String = row.try_get("kind").map_err(storage_err)?;
    Ok(TransactionRecord {
        tx_hash: row.try_get("tx_hash").map_err(storage_err)?,
        from: row.try_get("from_address").map_err(storage_err)?,
        to: row.try_get("to_address").map_err(storage_err)?,
        amount: u256_col(row, "amount")?,
        block_number: u64_col(row, "block_number")?,
        block_timestamp: row.try_get("block_timestamp").map_err(storage_err)?,
        log_index: u64_col(row, "log_index")?,
        kind: TxKind::parse(&kind)
            .ok_or_else(|| IndexerError::Storage(format!("unknown transaction kind '{kind}'")))?,
    })
}

fn corporate_action_from_row(row: &SqliteRow) -> Result<CorporateAction, IndexerError> {
    Ok(CorporateAction {
        action_id: row.try_get("action_id").map_err(storage_err)?,
        action_kind: row.try_get("action_kind").map_err(storage_err)?,
        payload: row.try_get("payload").map_err(storage_err)?,
        block_number: u64_col(row, "block_number")?,
        block_timestamp: row.try_get("block_timestamp").map_err(storage_err)?,
        log_index: u64_col(row, "log_index")?,
    })
}

fn balance_from_row(row: &SqliteRow) -> Result<ShareholderBalance, IndexerError> {
    Ok(ShareholderBalance {
        address: row.try_get("address").map_err(storage_err)?,
        balance: u256_col(row, "balance")?,
        effective_balance: u256_col(row, "effective_balance")?,
        last_updated_block: u64_col(row, "last_updated_block")?,
    })
}
