//! Process-local record store.
//!
//! Backs `--ephemeral` runs and tests. Writes are staged per transaction and
//! only become visible on commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::ListingRecord;
use crate::storage::{RecordStore, StoreStats, StoreTransaction};

#[derive(Default)]
struct State {
    /// identity -> (insertion order, record)
    records: HashMap<String, (u64, ListingRecord)>,
    next_seq: u64,
    /// Remaining inserts before injected failures start
    #[cfg(test)]
    insert_budget: Option<usize>,
}

/// In-memory store shared by clones.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Committed record for `identity`.
    pub fn get(&self, identity: &str) -> Option<ListingRecord> {
        self.lock().records.get(identity).map(|(_, r)| r.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every insert after the first `n` fail with a retryable error.
    #[cfg(test)]
    pub(crate) fn fail_inserts_after(&self, n: usize) {
        self.lock().insert_budget = Some(n);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: HashMap::new(),
            order: Vec::new(),
        }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.lock();
        let total = state.records.len() as u64;
        let notified = state.records.values().filter(|(_, r)| r.notified).count() as u64;
        Ok(StoreStats {
            total,
            notified,
            pending: total - notified,
        })
    }

    async fn pending(&self) -> Result<Vec<ListingRecord>> {
        let state = self.lock();
        let mut pending: Vec<_> = state.records.values().filter(|(_, r)| !r.notified).collect();
        pending.sort_by_key(|(seq, _)| *seq);
        Ok(pending.into_iter().map(|(_, r)| r.clone()).collect())
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    /// Records written in this transaction, keyed by identity
    staged: HashMap<String, Staged>,
    /// Identities in first-write order
    order: Vec<String>,
}

struct Staged {
    record: ListingRecord,
    is_new: bool,
}

impl MemoryTransaction {
    fn current(&self, identity: &str) -> Option<ListingRecord> {
        match self.staged.get(identity) {
            Some(staged) => Some(staged.record.clone()),
            None => self.store.get(identity),
        }
    }

    fn stage(&mut self, record: ListingRecord, is_new: bool) {
        let identity = record.identity.clone();
        if !self.staged.contains_key(&identity) {
            self.order.push(identity.clone());
        }
        let is_new = is_new || self.staged.get(&identity).is_some_and(|s| s.is_new);
        self.staged.insert(identity, Staged { record, is_new });
    }

    fn update(
        &mut self,
        identity: &str,
        apply: impl FnOnce(&mut ListingRecord),
    ) -> Result<()> {
        let mut record = self.current(identity).ok_or_else(|| {
            AppError::storage(format!("no stored record with identity {identity}"), false)
        })?;
        apply(&mut record);
        self.stage(record, false);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_by_identity(&mut self, identity: &str) -> Result<Option<ListingRecord>> {
        Ok(self.current(identity))
    }

    async fn insert(&mut self, record: &ListingRecord) -> Result<()> {
        #[cfg(test)]
        {
            let mut state = self.store.lock();
            if let Some(budget) = state.insert_budget.as_mut() {
                if *budget == 0 {
                    return Err(AppError::storage("injected insert failure", true));
                }
                *budget -= 1;
            }
        }

        if self.current(&record.identity).is_some() {
            return Err(AppError::storage(
                format!("UNIQUE constraint failed: identity {}", record.identity),
                false,
            ));
        }
        self.stage(record.clone(), true);
        Ok(())
    }

    async fn touch(&mut self, identity: &str, scraped_at: DateTime<Utc>) -> Result<()> {
        self.update(identity, |r| r.scraped_at = scraped_at)
    }

    async fn mark_notified(&mut self, identity: &str) -> Result<()> {
        self.update(identity, |r| r.notified = true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            store,
            mut staged,
            order,
        } = *self;
        let mut state = store.lock();

        if let Some(conflict) = order
            .iter()
            .find(|id| staged[*id].is_new && state.records.contains_key(*id))
        {
            return Err(AppError::storage(
                format!("UNIQUE constraint failed: identity {conflict}"),
                false,
            ));
        }

        for identity in order {
            let Some(Staged { record, .. }) = staged.remove(&identity) else {
                continue;
            };
            match state.records.get_mut(&identity) {
                Some((_, existing)) => *existing = record,
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.records.insert(identity, (seq, record));
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
