//! Watch pipeline.
//!
//! - `retry`: bounded retries with growing randomized backoff
//! - `policy`: dedup against the store and notification dispatch
//! - `scheduler`: the perpetual cycle loop

pub mod policy;
pub mod retry;
pub mod scheduler;

use std::sync::Arc;

pub use policy::{NotificationPolicy, ProcessOutcome};
pub use retry::RetryPolicy;
pub use scheduler::{CycleScheduler, CycleSummary, SchedulerState};

use crate::error::Result;
use crate::models::Config;
use crate::notify::Dispatcher;
use crate::page::PageSource;
use crate::services::{ListingExtractor, PageAcquirer};
use crate::storage::RecordStore;
use crate::utils::jitter::Pacing;

/// Assemble a scheduler from configuration and its boundaries.
pub fn build_scheduler(
    config: &Config,
    source: Arc<dyn PageSource>,
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn Dispatcher>,
    pacing: Pacing,
) -> Result<CycleScheduler> {
    let acquirer = PageAcquirer::new(source, &config.crawler, pacing.clone());
    let extractor = ListingExtractor::from_config(config, pacing.clone())?;
    let retry = RetryPolicy::from_pacing(config.crawler.max_attempts, &pacing);
    let policy = NotificationPolicy::from_config(config, store, dispatcher);

    Ok(CycleScheduler::new(
        config.urls.clone(),
        acquirer,
        extractor,
        retry,
        policy,
        pacing,
    ))
}
