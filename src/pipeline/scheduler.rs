//! Cycle scheduler.
//!
//! Visits every configured URL in order, then sleeps a randomized interval
//! and starts over until cancelled. The first cycle after start only primes
//! the page visits; its findings are neither stored nor notified.

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::CycleContext;
use crate::pipeline::{NotificationPolicy, RetryPolicy};
use crate::services::{ListingExtractor, PageAcquirer};
use crate::utils::jitter::{Pacing, SecondsRange};

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningCycle,
    Sleeping,
    Stopped,
}

/// Totals for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub urls_visited: usize,
    pub urls_failed: usize,
    /// Pages whose listing container never appeared
    pub partial_pages: usize,
    pub listings_seen: usize,
    pub inserted: usize,
    pub delivered: usize,
    /// Cancellation arrived before every URL was visited
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct UrlReport {
    partial: bool,
    seen: usize,
    inserted: usize,
    delivered: usize,
}

/// Drives cycles over the configured URLs.
pub struct CycleScheduler {
    urls: Vec<String>,
    acquirer: PageAcquirer,
    extractor: ListingExtractor,
    retry: RetryPolicy,
    policy: NotificationPolicy,
    pacing: Pacing,
    state: SchedulerState,
    cycle: u64,
    initial_run: bool,
}

impl CycleScheduler {
    pub fn new(
        urls: Vec<String>,
        acquirer: PageAcquirer,
        extractor: ListingExtractor,
        retry: RetryPolicy,
        policy: NotificationPolicy,
        pacing: Pacing,
    ) -> Self {
        Self {
            urls,
            acquirer,
            extractor,
            retry,
            policy,
            pacing,
            state: SchedulerState::Idle,
            cycle: 0,
            initial_run: true,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Whether the next cycle is still the suppressed first one.
    pub fn is_initial_run(&self) -> bool {
        self.initial_run
    }

    /// Run cycles until `token` is cancelled.
    pub async fn run(&mut self, token: CancellationToken) {
        log::info!("Watching {} URL(s)", self.urls.len());

        while !token.is_cancelled() {
            self.cycle += 1;
            self.state = SchedulerState::RunningCycle;
            let ctx = CycleContext::new(self.cycle, self.initial_run);
            if ctx.initial_run {
                log::info!("Cycle {}: initial run, listings are recorded from the next cycle", ctx.cycle);
            } else {
                log::info!("Cycle {} started", ctx.cycle);
            }

            let wait = match self.run_cycle(&ctx, &token).await {
                Ok(summary) => {
                    log_summary(&ctx, &summary);
                    if summary.interrupted {
                        break;
                    }
                    self.initial_run = false;
                    self.pacing.cycle_sleep()
                }
                Err(e) => {
                    log::error!("Cycle {} aborted: {e}", ctx.cycle);
                    self.policy
                        .alert(&format!("Cycle {} aborted: {e}", ctx.cycle))
                        .await;
                    self.pacing.recovery.sample()
                }
            };

            self.state = SchedulerState::Sleeping;
            if let Ok(delta) = chrono::Duration::from_std(wait) {
                log::info!(
                    "Next run at {} (in {:.0}s)",
                    (Local::now() + delta).format("%H:%M:%S"),
                    wait.as_secs_f64()
                );
            }
            let slept = tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(wait) => true,
            };
            if !slept {
                break;
            }
        }

        self.state = SchedulerState::Stopped;
        log::info!("Scheduler stopped after {} cycle(s)", self.cycle);
    }

    /// Run a single cycle that stores and notifies immediately.
    pub async fn run_once(&mut self, token: &CancellationToken) -> Result<CycleSummary> {
        self.cycle += 1;
        self.state = SchedulerState::RunningCycle;
        let ctx = CycleContext::new(self.cycle, false);
        let result = self.run_cycle(&ctx, token).await;
        self.state = SchedulerState::Stopped;
        if let Ok(summary) = &result {
            log_summary(&ctx, summary);
        }
        result
    }

    /// Visit every URL once.
    ///
    /// Page failures are logged and skipped. A storage failure aborts the
    /// cycle and is returned.
    pub async fn run_cycle(
        &self,
        ctx: &CycleContext,
        token: &CancellationToken,
    ) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        for (index, url) in self.urls.iter().enumerate() {
            if index > 0 && !pause(self.pacing.between_urls, token).await {
                summary.interrupted = true;
                break;
            }
            let result = self
                .retry
                .run(url, token, |_| self.visit(url, ctx))
                .await;
            match result {
                Ok(None) => {
                    summary.interrupted = true;
                    break;
                }
                Ok(Some(report)) => {
                    summary.urls_visited += 1;
                    summary.partial_pages += usize::from(report.partial);
                    summary.listings_seen += report.seen;
                    summary.inserted += report.inserted;
                    summary.delivered += report.delivered;
                }
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    log::error!("Skipping {url}: {e}");
                    summary.urls_failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Acquire, extract and (outside the first cycle) process one URL.
    async fn visit(&self, url: &str, ctx: &CycleContext) -> Result<UrlReport> {
        let page = self.acquirer.acquire(url).await?;
        let extraction = self.extractor.extract(&page, ctx.started_at).await;
        page.close().await;
        let extraction = extraction?;

        let mut report = UrlReport {
            partial: extraction.is_partial(),
            seen: extraction.records().len(),
            ..UrlReport::default()
        };
        log::info!("Extracted {} listings from {url}", report.seen);

        if ctx.initial_run {
            return Ok(report);
        }
        let outcome = self.policy.process(&extraction.into_records()).await?;
        report.inserted = outcome.inserted;
        report.delivered = outcome.delivered;
        Ok(report)
    }
}

/// Sleep for a sampled pause; `false` if cancelled first.
async fn pause(range: SecondsRange, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = range.pause() => true,
    }
}

fn log_summary(ctx: &CycleContext, summary: &CycleSummary) {
    log::info!(
        "Cycle {} finished: {} URL(s) visited, {} failed, {} listings seen, {} new, {} notified",
        ctx.cycle,
        summary.urls_visited,
        summary.urls_failed,
        summary.listings_seen,
        summary.inserted,
        summary.delivered
    );
    if summary.partial_pages > 0 {
        log::warn!(
            "Cycle {}: {} page(s) timed out before listings appeared",
            ctx.cycle,
            summary.partial_pages
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::models::{CrawlerConfig, SelectorConfig};
    use crate::storage::MemoryStore;
    use crate::test_support::{RecordingDispatcher, StaticPageSource, listing_page};

    const URL_A: &str = "https://newyork.craigslist.org/search/zip";
    const URL_B: &str = "https://newyork.craigslist.org/search/brk/zip";

    struct Fixture {
        source: StaticPageSource,
        store: MemoryStore,
        dispatcher: Arc<RecordingDispatcher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source: StaticPageSource::new(),
                store: MemoryStore::new(),
                dispatcher: Arc::new(RecordingDispatcher::new()),
            }
        }

        fn scheduler(&self, urls: &[&str], pacing: Pacing) -> CycleScheduler {
            let acquirer = PageAcquirer::new(
                Arc::new(self.source.clone()),
                &CrawlerConfig::default(),
                pacing.clone(),
            );
            let extractor =
                ListingExtractor::new(SelectorConfig::default(), &[], None, pacing.clone())
                    .unwrap();
            let policy = NotificationPolicy::new(
                Arc::new(self.store.clone()),
                self.dispatcher.clone(),
                true,
                "[lw]",
            );
            CycleScheduler::new(
                urls.iter().map(|u| u.to_string()).collect(),
                acquirer,
                extractor,
                RetryPolicy::from_pacing(3, &pacing),
                policy,
                pacing,
            )
        }
    }

    #[tokio::test]
    async fn test_first_cycle_is_suppressed() {
        let fx = Fixture::new();
        fx.source.page(URL_A, 200, &listing_page(&[("1", "Desk"), ("2", "Lamp")]));
        let scheduler = fx.scheduler(&[URL_A], Pacing::instant());
        let token = CancellationToken::new();

        let first = scheduler.run_cycle(&CycleContext::new(1, true), &token).await.unwrap();
        assert_eq!(first.listings_seen, 2);
        assert_eq!(first.inserted, 0);
        assert!(fx.store.is_empty());
        assert!(fx.dispatcher.sent().is_empty());

        let second = scheduler.run_cycle(&CycleContext::new(2, false), &token).await.unwrap();
        assert_eq!(second.inserted, 2);
        assert_eq!(second.delivered, 2);
        assert_eq!(fx.dispatcher.subjects(), vec!["[lw] 2 New Items Found"]);
    }

    #[tokio::test]
    async fn test_failed_url_does_not_abort_cycle() {
        let fx = Fixture::new();
        fx.source.page(URL_A, 404, "");
        fx.source.page(URL_B, 200, &listing_page(&[("9", "Shelf")]));
        let scheduler = fx.scheduler(&[URL_A, URL_B], Pacing::instant());

        let summary = scheduler
            .run_cycle(&CycleContext::new(2, false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.urls_failed, 1);
        assert_eq!(summary.urls_visited, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(fx.source.navigations(URL_A), 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_then_skipped() {
        let fx = Fixture::new();
        fx.source.timeout(URL_A);
        let scheduler = fx.scheduler(&[URL_A], Pacing::instant());

        let summary = scheduler
            .run_cycle(&CycleContext::new(2, false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.urls_failed, 1);
        assert_eq!(fx.source.navigations(URL_A), 3);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_cycle() {
        let fx = Fixture::new();
        fx.store.fail_inserts_after(0);
        fx.source.page(URL_A, 200, &listing_page(&[("1", "Desk")]));
        fx.source.page(URL_B, 200, &listing_page(&[("2", "Lamp")]));
        let scheduler = fx.scheduler(&[URL_A, URL_B], Pacing::instant());

        let err = scheduler
            .run_cycle(&CycleContext::new(2, false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert_eq!(fx.source.navigations(URL_A), 3);
        assert_eq!(fx.source.navigations(URL_B), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_stops() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler(&[URL_A], Pacing::instant());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let token = CancellationToken::new();
        token.cancel();
        scheduler.run(token).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loops_until_cancelled() {
        let fx = Fixture::new();
        fx.source.page(URL_A, 200, &listing_page(&[("1", "Desk")]));
        let pacing = Pacing {
            min_wait_secs: 10,
            max_wait_secs: 10,
            ..Pacing::instant()
        };
        let mut scheduler = fx.scheduler(&[URL_A], pacing);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                token.cancel();
            }
        };
        tokio::join!(scheduler.run(token), canceller);

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.cycles(), 3);
        assert!(!scheduler.is_initial_run());
        // Cycle 1 was suppressed, cycle 2 notified, cycle 3 saw nothing new.
        assert_eq!(fx.dispatcher.sent().len(), 1);
        assert!(fx.store.get("1").unwrap().notified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_abort_sends_alert_and_recovers() {
        let fx = Fixture::new();
        fx.store.fail_inserts_after(0);
        fx.source.page(URL_A, 200, &listing_page(&[("1", "Desk")]));
        let pacing = Pacing {
            min_wait_secs: 10,
            max_wait_secs: 10,
            recovery: SecondsRange::new(30.0, 30.0),
            ..Pacing::instant()
        };
        let mut scheduler = fx.scheduler(&[URL_A], pacing);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            async move {
                // cycle 1 at 0s, cycle 2 at 10s aborts, recovery until 40s
                tokio::time::sleep(Duration::from_secs(35)).await;
                token.cancel();
            }
        };
        tokio::join!(scheduler.run(token), canceller);

        assert_eq!(scheduler.cycles(), 2);
        assert_eq!(fx.dispatcher.subjects(), vec!["[lw] Error Alert"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_backoff_interrupts_cycle() {
        let fx = Fixture::new();
        fx.source.timeout(URL_A);
        fx.source.page(URL_B, 200, &listing_page(&[("1", "Desk")]));
        let pacing = Pacing {
            backoff_step: SecondsRange::new(5.0, 5.0),
            ..Pacing::instant()
        };
        let scheduler = fx.scheduler(&[URL_A, URL_B], pacing);
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            }
        };
        let ctx = CycleContext::new(2, false);
        let (summary, ()) = tokio::join!(
            scheduler.run_cycle(&ctx, &token),
            canceller
        );
        let summary = summary.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.urls_failed, 0);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(fx.source.navigations(URL_A), 1);
        assert_eq!(fx.source.navigations(URL_B), 0);
    }

    #[tokio::test]
    async fn test_run_once_records_immediately() {
        let fx = Fixture::new();
        fx.source.page(URL_A, 200, &listing_page(&[("1", "Desk")]));
        let mut scheduler = fx.scheduler(&[URL_A], Pacing::instant());

        let summary = scheduler.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(fx.dispatcher.sent().len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
