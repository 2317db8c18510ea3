//! Fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::ListingRecord;
use crate::notify::{Dispatcher, Notification};
use crate::page::{
    Interaction, PageElement, PageSession, PageSource, SessionIdentity, select_in_document,
};

/// Record with a canonical link for `identity`.
pub fn record(identity: &str, title: &str) -> ListingRecord {
    ListingRecord::new(
        format!("https://newyork.craigslist.org/brk/zip/d/item/{identity}.html"),
        title,
        "2h ago",
        "Brooklyn",
        Utc::now(),
    )
    .unwrap()
}

/// Search results document with one listing per `(identity, title)`.
pub fn listing_page(items: &[(&str, &str)]) -> String {
    let listings: String = items
        .iter()
        .map(|(id, title)| {
            format!(
                r#"<li class="cl-search-result" data-pid="{id}">
  <a class="posting-title" href="/brk/zip/d/item/{id}.html"><span class="label">{title}</span></a>
  <div class="meta">2h ago<span class="separator">·</span>Brooklyn</div>
</li>
"#
            )
        })
        .collect();
    format!("<html><body><ol class=\"results\">\n{listings}</ol></body></html>")
}

#[derive(Clone)]
enum Response {
    Page { status: u16, html: String },
    NoResponse,
    Timeout,
}

#[derive(Default)]
struct SourceState {
    responses: Mutex<HashMap<String, Response>>,
    sessions: AtomicUsize,
    closed: AtomicUsize,
    failing_close: AtomicBool,
    navigations: Mutex<HashMap<String, usize>>,
    interactions: Mutex<Vec<Interaction>>,
}

/// Serves canned documents keyed by URL. Unknown URLs get no response.
#[derive(Clone, Default)]
pub struct StaticPageSource {
    state: Arc<SourceState>,
}

impl StaticPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, url: &str, response: Response) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn page(&self, url: &str, status: u16, html: &str) {
        self.set(
            url,
            Response::Page {
                status,
                html: html.to_string(),
            },
        );
    }

    pub fn no_response(&self, url: &str) {
        self.set(url, Response::NoResponse);
    }

    pub fn timeout(&self, url: &str) {
        self.set(url, Response::Timeout);
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Make every session close report an error.
    pub fn fail_close(&self) {
        self.state.failing_close.store(true, Ordering::SeqCst);
    }

    pub fn navigations(&self, url: &str) -> usize {
        self.state
            .navigations
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.state.interactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for StaticPageSource {
    async fn open_session(&self, identity: &SessionIdentity) -> Result<Box<dyn PageSession>> {
        assert!(!identity.user_agent.is_empty());
        self.state.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticSession {
            state: Arc::clone(&self.state),
            document: None,
            timeout: identity.timeout,
        }))
    }
}

struct StaticSession {
    state: Arc<SourceState>,
    document: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl PageSession for StaticSession {
    async fn navigate(&mut self, url: &str) -> Result<Option<u16>> {
        *self
            .state
            .navigations
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let response = self.state.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(Response::Page { status, html }) => {
                self.document = Some(html);
                Ok(Some(status))
            }
            Some(Response::Timeout) => Err(AppError::timeout(
                format!("navigating to {url}"),
                self.timeout.as_millis() as u64,
            )),
            Some(Response::NoResponse) | None => Ok(None),
        }
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(!self.query_all(selector)?.is_empty())
    }

    fn query_all(&self, selector: &str) -> Result<Vec<PageElement>> {
        select_in_document(self.document.as_deref().unwrap_or_default(), selector)
    }

    async fn interact(&mut self, action: Interaction) -> Result<()> {
        self.state.interactions.lock().unwrap().push(action);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.state.failing_close.load(Ordering::SeqCst) {
            return Err(AppError::validation("session already gone"));
        }
        Ok(())
    }
}

/// Captures dispatched notifications; can be switched to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::dispatch("recipient server unavailable"));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
