//! SQLite record store.
//!
//! One table per watcher configuration. The identity column carries a
//! UNIQUE constraint, so a racing duplicate insert fails the batch instead of
//! creating a second row.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::error::{AppError, Result};
use crate::models::{DatabaseConfig, ListingRecord, is_valid_table_name};
use crate::storage::{RecordStore, StoreStats, StoreTransaction};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable store backed by a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database and its listing table.
    pub async fn connect(config: &DatabaseConfig, table: &str) -> Result<Self> {
        if !is_valid_table_name(table) {
            return Err(AppError::config(format!("invalid table name: {table}")));
        }

        if let Some(path) = config.file_path() {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.init().await?;
        log::info!("Opened record store {} (table {})", config.url, store.table);
        Ok(store)
    }

    /// Create the listing table and its index if missing.
    async fn init(&self) -> Result<()> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL UNIQUE,
                link TEXT NOT NULL,
                title TEXT NOT NULL,
                posted_time TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                scraped_at TEXT NOT NULL,
                notified INTEGER NOT NULL DEFAULT 0
            )
            "#,
            table = self.table
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_notified ON {table} (notified)",
            table = self.table
        );

        sqlx::query(&create_table).execute(&self.pool).await?;
        sqlx::query(&create_index).execute(&self.pool).await?;
        Ok(())
    }

}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction {
            tx,
            table: self.table.clone(),
        }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let sql = format!(
            "SELECT COUNT(*) AS total, COALESCE(SUM(notified), 0) AS notified FROM {}",
            self.table
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total")?;
        let notified: i64 = row.try_get("notified")?;
        Ok(StoreStats {
            total: total as u64,
            notified: notified as u64,
            pending: (total - notified).max(0) as u64,
        })
    }

    async fn pending(&self) -> Result<Vec<ListingRecord>> {
        let sql = format!(
            "SELECT identity, link, title, posted_time, location, scraped_at, notified \
             FROM {} WHERE notified = 0 ORDER BY id",
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    table: String,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn find_by_identity(&mut self, identity: &str) -> Result<Option<ListingRecord>> {
        let sql = format!(
            "SELECT identity, link, title, posted_time, location, scraped_at, notified \
             FROM {} WHERE identity = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(identity)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert(&mut self, record: &ListingRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (identity, link, title, posted_time, location, scraped_at, notified) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(&record.identity)
            .bind(&record.link)
            .bind(&record.title)
            .bind(&record.posted_time)
            .bind(&record.location)
            .bind(record.scraped_at)
            .bind(record.notified)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn touch(&mut self, identity: &str, scraped_at: DateTime<Utc>) -> Result<()> {
        let sql = format!("UPDATE {} SET scraped_at = ? WHERE identity = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(scraped_at)
            .bind(identity)
            .execute(&mut *self.tx)
            .await?;
        expect_one_row(result.rows_affected(), identity)
    }

    async fn mark_notified(&mut self, identity: &str) -> Result<()> {
        let sql = format!("UPDATE {} SET notified = 1 WHERE identity = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(identity)
            .execute(&mut *self.tx)
            .await?;
        expect_one_row(result.rows_affected(), identity)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn expect_one_row(affected: u64, identity: &str) -> Result<()> {
    if affected == 0 {
        return Err(AppError::storage(
            format!("no stored record with identity {identity}"),
            false,
        ));
    }
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<ListingRecord> {
    Ok(ListingRecord {
        identity: row.try_get("identity")?,
        link: row.try_get("link")?,
        title: row.try_get("title")?,
        posted_time: row.try_get("posted_time")?,
        location: row.try_get("location")?,
        scraped_at: row.try_get("scraped_at")?,
        notified: row.try_get("notified")?,
    })
}
