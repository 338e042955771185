//! Durable state store using SQLite.
//!
//! One row per record key, value stored as JSON text. WAL mode keeps reads
//! cheap while the engine writes, and every `set` is a single upsert so a
//! crash leaves either the old or the new document, never a torn one.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use super::{StateStore, StoreError};
use crate::utils::STATE_DB_FILE;

/// SQL schema for the state database
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS state_records (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteStateStore {
    /// Open existing state database or create a new one.
    ///
    /// The database is stored at `{storage_dir}/archive_queue.sqlite`
    pub async fn open(storage_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(storage_dir).await?;
        let db_path = storage_dir.join(STATE_DB_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // FULL: a restart must observe every acknowledged transition
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        info!("Opened queue state database at {}", db_path.display());
        Ok(Self { pool, db_path })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of stored records
    pub async fn record_count(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM state_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl StateStore for SqliteStateStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM state_records WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;

            match row {
                Some((text,)) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let text = serde_json::to_string(&value)?;
            sqlx::query(
                r#"
                INSERT INTO state_records (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(text)
            .bind(crate::utils::now_millis())
            .execute(&self.pool)
            .await?;
            log::debug!("Persisted state record {key}");
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM state_records WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }
}
