//! SQLite storage backend for BridgeWatch.
//!
//! Three tables mirror the three record kinds: `messages` and `redemptions`
//! keyed by the derived message id, `checkpoints` keyed by chain name. Each
//! record row keeps the full JSON document next to a few indexed columns.
//!
//! # Usage
//! ```rust,no_run
//! use bridgewatch_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./bridgewatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info};

use bridgewatch_core::error::WatcherError;
use bridgewatch_core::store::{
    advance_checkpoint, merge_message, merge_redemption, settle_message, Checkpoint, MessageStore,
};
use bridgewatch_core::types::{MessageRecord, RedemptionRecord};

fn db_err(e: sqlx::Error) -> WatcherError {
    WatcherError::Storage(e.to_string())
}

fn decode_doc<T: serde::de::DeserializeOwned>(doc: &str) -> Result<T, WatcherError> {
    serde_json::from_str(doc).map_err(|e| WatcherError::Storage(format!("corrupt row: {e}")))
}

fn encode_doc<T: serde::Serialize>(value: &T) -> Result<String, WatcherError> {
    serde_json::to_string(value).map_err(|e| WatcherError::Storage(e.to_string()))
}

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes read-merge-write upserts across chain workers.
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./bridgewatch.db"`) or a full
    /// SQLite URL (`"sqlite:./bridgewatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, WatcherError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self::with_pool(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, WatcherError> {
        // every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self::with_pool(pool);
        store.init_schema().await?;
        Ok(store)
    }

    fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    async fn init_schema(&self) -> Result<(), WatcherError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id            TEXT    NOT NULL PRIMARY KEY,
                emitter_chain INTEGER NOT NULL,
                sequence      INTEGER NOT NULL,
                block_number  INTEGER NOT NULL,
                status        TEXT    NOT NULL,
                revision      INTEGER NOT NULL,
                doc           TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_chain_seq
             ON messages (emitter_chain, sequence)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS redemptions (
                id       TEXT    NOT NULL PRIMARY KEY,
                status   TEXT    NOT NULL,
                revision INTEGER NOT NULL,
                doc      TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain         TEXT    NOT NULL PRIMARY KEY,
                chain_id      INTEGER NOT NULL,
                last_block    INTEGER NOT NULL,
                last_sequence INTEGER,
                created_at    TEXT    NOT NULL,
                updated_at    TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn find_message(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Option<MessageRecord>, WatcherError> {
        let row = sqlx::query("SELECT doc FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        row.map(|r| decode_doc(&r.get::<String, _>("doc"))).transpose()
    }

    async fn find_redemption(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Option<RedemptionRecord>, WatcherError> {
        let row = sqlx::query("SELECT doc FROM redemptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        row.map(|r| decode_doc(&r.get::<String, _>("doc"))).transpose()
    }

    async fn put_message(
        tx: &mut Transaction<'_, Sqlite>,
        record: &MessageRecord,
    ) -> Result<(), WatcherError> {
        sqlx::query(
            "INSERT INTO messages (id, emitter_chain, sequence, block_number, status, revision, doc)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                revision = excluded.revision,
                doc = excluded.doc",
        )
        .bind(&record.id)
        .bind(record.emitter_chain as i64)
        .bind(record.sequence as i64)
        .bind(record.block_number as i64)
        .bind(record.status.to_string())
        .bind(record.revision as i64)
        .bind(encode_doc(record)?)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn put_redemption(
        tx: &mut Transaction<'_, Sqlite>,
        record: &RedemptionRecord,
    ) -> Result<(), WatcherError> {
        sqlx::query(
            "INSERT INTO redemptions (id, status, revision, doc)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                revision = excluded.revision,
                doc = excluded.doc",
        )
        .bind(&record.id)
        .bind(record.destination_tx.status.to_string())
        .bind(record.revision as i64)
        .bind(encode_doc(record)?)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    fn checkpoint_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, WatcherError> {
        let parse = |col: &str| -> Result<DateTime<Utc>, WatcherError> {
            let raw: String = row.get(col);
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| WatcherError::Storage(format!("bad {col} '{raw}': {e}")))
        };
        Ok(Checkpoint {
            chain: row.get("chain"),
            chain_id: row.get::<i64, _>("chain_id") as u16,
            last_block: row.get::<i64, _>("last_block") as u64,
            last_sequence: row.get::<Option<i64>, _>("last_sequence").map(|s| s as u64),
            created_at: parse("created_at")?,
            updated_at: parse("updated_at")?,
        })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn start(&self) -> Result<(), WatcherError> {
        info!("SQLite store ready");
        Ok(())
    }

    async fn stop(&self) -> Result<(), WatcherError> {
        self.pool.close().await;
        info!("SQLite store closed");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, WatcherError> {
        let row = sqlx::query(
            "SELECT chain, chain_id, last_block, last_sequence, created_at, updated_at
             FROM checkpoints WHERE chain = ?",
        )
        .bind(chain)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::checkpoint_from_row).transpose()
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, WatcherError> {
        let rows = sqlx::query(
            "SELECT chain, chain_id, last_block, last_sequence, created_at, updated_at
             FROM checkpoints ORDER BY chain ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::checkpoint_from_row).collect()
    }

    async fn store_messages(
        &self,
        chain: &str,
        records: &[MessageRecord],
    ) -> Result<(), WatcherError> {
        let _guard = self.write_lock.lock().await;
        for record in records {
            let now = Utc::now();
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let existing = Self::find_message(&mut tx, &record.id).await?;
            let redeemed = Self::find_redemption(&mut tx, &record.id)
                .await?
                .map(|r| r.destination_tx.status);
            let merged = merge_message(existing.as_ref(), record, redeemed, now);
            Self::put_message(&mut tx, &merged).await?;
            tx.commit().await.map_err(db_err)?;
            debug!(chain, id = %record.id, revision = merged.revision, "message upserted");
        }
        Ok(())
    }

    async fn store_redemptions(
        &self,
        chain: &str,
        records: &[RedemptionRecord],
    ) -> Result<(), WatcherError> {
        let _guard = self.write_lock.lock().await;
        for record in records {
            let now = Utc::now();
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            if let Some(mut message) = Self::find_message(&mut tx, &record.id).await? {
                settle_message(&mut message, record.destination_tx.status, now);
                Self::put_message(&mut tx, &message).await?;
            }
            let existing = Self::find_redemption(&mut tx, &record.id).await?;
            let merged = merge_redemption(existing.as_ref(), record, now);
            Self::put_redemption(&mut tx, &merged).await?;
            tx.commit().await.map_err(db_err)?;
            debug!(chain, id = %record.id, revision = merged.revision, "redemption upserted");
        }
        Ok(())
    }

    async fn store_checkpoint(
        &self,
        chain: &str,
        chain_id: u16,
        last_block: u64,
        last_sequence: Option<u64>,
    ) -> Result<Checkpoint, WatcherError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.load_checkpoint(chain).await?;
        let cp = advance_checkpoint(
            existing.as_ref(),
            chain,
            chain_id,
            last_block,
            last_sequence,
            Utc::now(),
        );

        sqlx::query(
            "INSERT INTO checkpoints (chain, chain_id, last_block, last_sequence, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(chain) DO UPDATE SET
                chain_id = excluded.chain_id,
                last_block = excluded.last_block,
                last_sequence = excluded.last_sequence,
                updated_at = excluded.updated_at",
        )
        .bind(&cp.chain)
        .bind(cp.chain_id as i64)
        .bind(cp.last_block as i64)
        .bind(cp.last_sequence.map(|s| s as i64))
        .bind(cp.created_at.to_rfc3339())
        .bind(cp.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(chain, block = cp.last_block, "checkpoint stored");
        Ok(cp)
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, WatcherError> {
        let row = sqlx::query("SELECT doc FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| decode_doc(&r.get::<String, _>("doc"))).transpose()
    }

    async fn get_redemption(&self, id: &str) -> Result<Option<RedemptionRecord>, WatcherError> {
        let row = sqlx::query("SELECT doc FROM redemptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| decode_doc(&r.get::<String, _>("doc"))).transpose()
    }
}
