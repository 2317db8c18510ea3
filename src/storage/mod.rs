//! Record store abstractions.
//!
//! Listings are deduplicated by identity. All writes of one batch go through
//! a [`StoreTransaction`] so a failure part-way through leaves the store as
//! it was before the batch.
//!
//! - `sqlite`: durable store backed by `sqlx`
//! - `memory`: process-local store for dry runs and tests

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::ListingRecord;

// Re-export for convenience
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Record counts reported by `info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: u64,
    pub notified: u64,
    /// Stored but not yet confirmed delivered
    pub pending: u64,
}

/// Trait for listing record stores.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Start an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Count stored records.
    async fn stats(&self) -> Result<StoreStats>;

    /// Records stored but never delivered, oldest first.
    async fn pending(&self) -> Result<Vec<ListingRecord>>;

    /// Release connections before exit.
    async fn close(&self) {}
}

/// Atomic unit of work against a [`RecordStore`].
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_by_identity(&mut self, identity: &str) -> Result<Option<ListingRecord>>;

    /// Insert a new record. Fails if the identity is already stored.
    async fn insert(&mut self, record: &ListingRecord) -> Result<()>;

    /// Refresh the last-seen timestamp of an existing record.
    async fn touch(&mut self, identity: &str, scraped_at: DateTime<Utc>) -> Result<()>;

    /// Flag a record as delivered.
    async fn mark_notified(&mut self, identity: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
