//! Page source boundary.
//!
//! The pipeline never talks to a rendering engine directly. It opens an
//! isolated [`PageSession`] from a [`PageSource`], navigates, and reads the
//! loaded document through CSS selectors. Elements are handed out as owned
//! [`PageElement`] snapshots so no parser state is held across awaits.
//!
//! - `http`: static documents fetched with `reqwest`

pub mod http;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};

pub use http::HttpPageSource;

/// Synthetic identity presented by one browsing session.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
    /// Navigation and selector deadline for this session
    pub timeout: Duration,
}

impl SessionIdentity {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            viewport: (1920, 1080),
            locale: "en-US".to_string(),
            timezone: "America/New_York".to_string(),
            timeout,
        }
    }
}

/// Simulated user interaction. Sources without a pointer may ignore these.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    MovePointer { x: u32, y: u32 },
    /// Scroll to a fraction of the document height
    Scroll { fraction: f64 },
    /// Hover the n-th `a` element without clicking
    HoverLink { index: usize },
}

/// Opens isolated browsing sessions.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn open_session(&self, identity: &SessionIdentity) -> Result<Box<dyn PageSession>>;
}

/// One isolated browsing session holding at most one loaded document.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate to `url` and report the final status, `None` when no
    /// response arrived at all.
    async fn navigate(&mut self, url: &str) -> Result<Option<u16>>;

    /// Wait until `selector` matches, returning `false` once `timeout` passes.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// All elements currently matching `selector`.
    fn query_all(&self, selector: &str) -> Result<Vec<PageElement>>;

    /// Best-effort interaction.
    async fn interact(&mut self, action: Interaction) -> Result<()>;

    /// Release the session.
    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Owned snapshot of one element: its markup, text and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct PageElement {
    html: String,
    text: String,
    attributes: HashMap<String, String>,
}

impl PageElement {
    pub fn from_element(element: &ElementRef<'_>) -> Self {
        Self {
            html: element.html(),
            text: element.text().collect(),
            attributes: element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Concatenated text of the element and its descendants.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First element within this one matching `selector`.
    pub fn select_first(&self, selector: &str) -> Result<Option<PageElement>> {
        let selector = parse_selector(selector)?;
        let fragment = Html::parse_fragment(&self.html);
        Ok(fragment
            .select(&selector)
            .next()
            .map(|el| PageElement::from_element(&el)))
    }
}

/// Parse a CSS selector, mapping failures into [`AppError::Selector`].
pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Select elements from a whole document.
pub fn select_in_document(document: &str, selector: &str) -> Result<Vec<PageElement>> {
    let selector = parse_selector(selector)?;
    let html = Html::parse_document(document);
    Ok(html
        .select(&selector)
        .map(|el| PageElement::from_element(&el))
        .collect())
}
