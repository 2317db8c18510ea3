//! Dedup and notification policy.
//!
//! Decides which extracted listings are new, persists them, and delivers
//! notifications. A record is only flagged notified after the dispatcher
//! confirmed delivery, so a failed send leaves it eligible for the next
//! sighting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;
use crate::models::{Config, ListingRecord};
use crate::notify::{Dispatcher, alert_notification, listings_notification};
use crate::storage::{RecordStore, StoreTransaction};

/// What one `process` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Records eligible for notification this call
    pub notify_set: Vec<ListingRecord>,
    /// Rows created
    pub inserted: usize,
    /// Records confirmed delivered and flagged notified
    pub delivered: usize,
    /// Records whose dispatch failed
    pub failed: usize,
    /// Dispatch skipped because the cooldown had not elapsed
    pub deferred: bool,
}

/// Applies dedup rules and dispatches notifications.
pub struct NotificationPolicy {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn Dispatcher>,
    combine: bool,
    cooldown: Duration,
    subject_prefix: String,
    last_dispatch: Mutex<Option<Instant>>,
}

impl NotificationPolicy {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn Dispatcher>,
        combine: bool,
        subject_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            combine,
            cooldown: Duration::ZERO,
            subject_prefix: subject_prefix.into(),
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self::new(
            store,
            dispatcher,
            config.combine_notifications,
            config.email.subject_prefix.clone(),
        )
        .with_cooldown(Duration::from_secs(config.notification_cooldown_secs))
    }

    /// Minimum time between two dispatches.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Persist `records` and return those eligible for notification.
    ///
    /// All writes happen in one transaction; on error nothing is kept.
    pub async fn merge(&self, records: &[ListingRecord]) -> Result<(Vec<ListingRecord>, usize)> {
        let mut tx = self.store.begin().await?;
        match merge_into(tx.as_mut(), records).await {
            Ok(merged) => {
                tx.commit().await?;
                Ok(merged)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Rollback failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    /// Merge `records` into the store and notify about the eligible ones.
    ///
    /// Storage errors propagate. Dispatch errors are logged and leave the
    /// affected records eligible.
    pub async fn process(&self, records: &[ListingRecord]) -> Result<ProcessOutcome> {
        let (notify_set, inserted) = self.merge(records).await?;
        let mut outcome = ProcessOutcome {
            inserted,
            ..ProcessOutcome::default()
        };
        if notify_set.is_empty() {
            return Ok(outcome);
        }

        if let Some(remaining) = self.cooldown_remaining() {
            log::info!(
                "Deferring notification of {} listings; cooldown ends in {}s",
                notify_set.len(),
                remaining.as_secs()
            );
            outcome.deferred = true;
            outcome.notify_set = notify_set;
            return Ok(outcome);
        }

        let batches: Vec<&[ListingRecord]> = if self.combine {
            vec![&notify_set[..]]
        } else {
            notify_set.chunks(1).collect()
        };

        let mut delivered: Vec<&str> = Vec::new();
        for batch in batches {
            let notification = listings_notification(&self.subject_prefix, batch);
            match self.dispatcher.dispatch(&notification).await {
                Ok(()) => {
                    self.record_dispatch();
                    delivered.extend(batch.iter().map(|r| r.identity.as_str()));
                }
                Err(e) => {
                    log::error!("Failed to send notification '{}': {e}", notification.subject);
                    outcome.failed += batch.len();
                }
            }
        }

        if !delivered.is_empty() {
            self.mark_notified(&delivered).await?;
            outcome.delivered = delivered.len();
        }
        outcome.notify_set = notify_set;
        Ok(outcome)
    }

    /// Flag `identities` as delivered in one transaction.
    async fn mark_notified(&self, identities: &[&str]) -> Result<()> {
        let mut tx = self.store.begin().await?;
        for identity in identities {
            if let Err(e) = tx.mark_notified(identity).await {
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Rollback failed: {rollback_err}");
                }
                return Err(e);
            }
        }
        tx.commit().await
    }

    /// Send an operational error alert. Failures are only logged.
    pub async fn alert(&self, message: &str) {
        let notification = alert_notification(&self.subject_prefix, message);
        if let Err(e) = self.dispatcher.dispatch(&notification).await {
            log::error!("Failed to send error alert: {e}");
        }
    }

    fn lock_last_dispatch(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_dispatch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        if self.cooldown.is_zero() {
            return None;
        }
        let last = (*self.lock_last_dispatch())?;
        let elapsed = last.elapsed();
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    fn record_dispatch(&self) {
        *self.lock_last_dispatch() = Some(Instant::now());
    }
}

/// Apply the dedup rules inside an open transaction.
async fn merge_into(
    tx: &mut dyn StoreTransaction,
    records: &[ListingRecord],
) -> Result<(Vec<ListingRecord>, usize)> {
    let mut seen = HashSet::new();
    let mut notify_set = Vec::new();
    let mut inserted = 0;

    for record in records {
        if !seen.insert(record.identity.as_str()) {
            continue;
        }
        match tx.find_by_identity(&record.identity).await? {
            None => {
                let mut fresh = record.clone();
                fresh.notified = false;
                tx.insert(&fresh).await?;
                log::info!("{}", fresh.format("New listing: {title} ({id})"));
                inserted += 1;
                notify_set.push(fresh);
            }
            Some(existing) if !existing.notified => {
                tx.touch(&record.identity, record.scraped_at).await?;
                log::debug!("{}", existing.format("Listing {id} still pending notification"));
                notify_set.push(ListingRecord {
                    scraped_at: record.scraped_at,
                    ..existing
                });
            }
            Some(_) => {
                tx.touch(&record.identity, record.scraped_at).await?;
            }
        }
    }
    Ok((notify_set, inserted))
}
