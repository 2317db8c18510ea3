//! End-to-end cycles over HTTP and SQLite.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use listing_watch::config::open_store;
use listing_watch::error::{AppError, Result};
use listing_watch::models::{Config, CycleContext};
use listing_watch::notify::{Dispatcher, Notification};
use listing_watch::page::HttpPageSource;
use listing_watch::pipeline::{CycleScheduler, build_scheduler};
use listing_watch::storage::{RecordStore, StoreStats, StoreTransaction};
use listing_watch::utils::jitter::Pacing;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const RESULTS: &str = r#"<html><body><ol>
  <li class="cl-search-result">
    <a class="posting-title" href="/brk/zip/d/free-desk/7001.html">Free desk</a>
    <div class="meta">1h ago<span>·</span>Brooklyn</div>
  </li>
  <li class="cl-search-result">
    <a class="posting-title" href="/que/zip/d/lamp/7002.html">Lamp</a>
    <div class="meta">3h ago<span>·</span>Queens</div>
  </li>
  <li class="cl-search-result">
    <span>sponsored</span>
  </li>
</ol></body></html>"#;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Dispatcher for Outbox {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

impl Outbox {
    fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.subject.clone())
            .collect()
    }
}

/// Store whose database is unreachable.
struct UnreachableStore;

#[async_trait]
impl RecordStore for UnreachableStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Err(AppError::storage("unable to open database file", false))
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats::default())
    }

    async fn pending(&self) -> Result<Vec<listing_watch::models::ListingRecord>> {
        Ok(Vec::new())
    }
}

fn config(dir: &TempDir, urls: Vec<String>) -> Config {
    let mut config = Config {
        urls,
        ..Config::default()
    };
    config.database.url = format!("sqlite://{}", dir.path().join("listings.db").display());
    config.email.subject_prefix = "[test]".to_string();
    config
}

fn scheduler(
    config: &Config,
    store: Arc<dyn RecordStore>,
    outbox: Arc<Outbox>,
) -> CycleScheduler {
    build_scheduler(
        config,
        Arc::new(HttpPageSource::new()),
        store,
        outbox,
        Pacing::instant(),
    )
    .unwrap()
}

#[tokio::test]
async fn first_cycle_primes_then_new_listings_are_notified_once() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/search/zip")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(RESULTS)
        .expect_at_least(3)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir, vec![format!("{}/search/zip", server.url())]);
    let config_path = dir.path().join("watch.toml");
    let store = open_store(&config, &config_path, false).await.unwrap();
    let outbox = Arc::new(Outbox::default());
    let scheduler = scheduler(&config, store.clone(), outbox.clone());
    let token = CancellationToken::new();

    let first = scheduler
        .run_cycle(&CycleContext::new(1, true), &token)
        .await
        .unwrap();
    assert_eq!(first.listings_seen, 2);
    assert_eq!(store.stats().await.unwrap().total, 0);
    assert!(outbox.subjects().is_empty());

    let second = scheduler
        .run_cycle(&CycleContext::new(2, false), &token)
        .await
        .unwrap();
    assert_eq!(second.inserted, 2);
    assert_eq!(outbox.subjects(), vec!["[test] 2 New Items Found"]);

    let third = scheduler
        .run_cycle(&CycleContext::new(3, false), &token)
        .await
        .unwrap();
    assert_eq!(third.inserted, 0);
    assert_eq!(outbox.subjects().len(), 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.notified, 2);
}

#[tokio::test]
async fn failing_url_is_skipped() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/search/broken")
        .with_status(500)
        .create_async()
        .await;
    server
        .mock("GET", "/search/zip")
        .with_status(200)
        .with_body(RESULTS)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(
        &dir,
        vec![
            format!("{}/search/broken", server.url()),
            format!("{}/search/zip", server.url()),
        ],
    );
    let store = open_store(&config, &dir.path().join("watch.toml"), true)
        .await
        .unwrap();
    let outbox = Arc::new(Outbox::default());
    let summary = scheduler(&config, store, outbox.clone())
        .run_cycle(&CycleContext::new(2, false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.urls_failed, 1);
    assert_eq!(summary.urls_visited, 1);
    assert_eq!(outbox.subjects(), vec!["[test] 2 New Items Found"]);
}

#[tokio::test]
async fn storage_failure_aborts_cycle() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/search/zip")
        .with_status(200)
        .with_body(RESULTS)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = config(&dir, vec![format!("{}/search/zip", server.url())]);
    let outbox = Arc::new(Outbox::default());
    let err = scheduler(&config, Arc::new(UnreachableStore), outbox.clone())
        .run_cycle(&CycleContext::new(2, false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_storage());
    assert!(outbox.subjects().is_empty());
}
