// src/services/acquirer.rs

//! Page acquisition.
//!
//! Every visit opens a fresh session with a randomly chosen user agent and a
//! jittered timeout, then performs a short, randomized interaction sequence
//! before the page is handed to the extractor.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::page::{Interaction, PageSession, PageSource, SessionIdentity};
use crate::utils::jitter::{Pacing, roll_timeout};

/// Probability of hovering a link during interaction simulation.
const HOVER_PROBABILITY: f64 = 0.3;

/// A navigated page with its session still open.
pub struct LoadedPage {
    pub url: String,
    /// Deadline rolled for this visit
    pub timeout: Duration,
    pub session: Box<dyn PageSession>,
}

impl LoadedPage {
    /// Release the underlying session.
    pub async fn close(self) {
        close_session(self.session, &self.url).await;
    }
}

async fn close_session(session: Box<dyn PageSession>, url: &str) {
    if let Err(e) = session.close().await {
        log::warn!("Failed to close session for {url}: {e}");
    }
}

/// Opens sessions and navigates them to listing pages.
pub struct PageAcquirer {
    source: Arc<dyn PageSource>,
    user_agents: Vec<String>,
    page_timeout_ms: u64,
    timeout_jitter_ms: u64,
    pacing: Pacing,
}

impl PageAcquirer {
    pub fn new(source: Arc<dyn PageSource>, config: &CrawlerConfig, pacing: Pacing) -> Self {
        Self {
            source,
            user_agents: config.user_agents.clone(),
            page_timeout_ms: config.page_timeout_ms,
            timeout_jitter_ms: config.timeout_jitter_ms,
            pacing,
        }
    }

    fn pick_user_agent(&self) -> Result<&str> {
        if self.user_agents.is_empty() {
            return Err(AppError::config("no user agents configured"));
        }
        let index = rand::random_range(0..self.user_agents.len());
        Ok(&self.user_agents[index])
    }

    /// Load `url` in a new session.
    ///
    /// A missing response or an error status yields [`AppError::Navigation`].
    /// Interaction failures are logged and never fail the acquisition.
    pub async fn acquire(&self, url: &str) -> Result<LoadedPage> {
        let timeout = roll_timeout(self.page_timeout_ms, self.timeout_jitter_ms);
        let identity = SessionIdentity::new(self.pick_user_agent()?, timeout);
        log::debug!(
            "Visiting {url} (timeout {} ms, ua {})",
            timeout.as_millis(),
            identity.user_agent
        );

        let mut session = self.source.open_session(&identity).await?;
        let status = match session.navigate(url).await {
            Ok(status) => status,
            Err(e) => {
                close_session(session, url).await;
                return Err(e);
            }
        };

        match status {
            Some(code) if code < 400 => {}
            other => {
                close_session(session, url).await;
                return Err(AppError::navigation(url, other));
            }
        }

        self.pacing.pre_interaction.pause().await;
        self.simulate_interaction(session.as_mut()).await;

        Ok(LoadedPage {
            url: url.to_string(),
            timeout,
            session,
        })
    }

    /// Move the pointer, scroll, and sometimes hover a link.
    async fn simulate_interaction(&self, session: &mut dyn PageSession) {
        let x = rand::random_range(100..=800);
        let y = rand::random_range(100..=600);
        self.interact(session, Interaction::MovePointer { x, y }).await;
        self.pacing.pointer.pause().await;

        let fraction = rand::random_range(0.0..0.8);
        self.interact(session, Interaction::Scroll { fraction }).await;
        self.pacing.scroll.pause().await;

        if rand::random_bool(HOVER_PROBABILITY) {
            let links = match session.query_all("a") {
                Ok(links) => links.len(),
                Err(e) => {
                    log::debug!("Skipping hover: {e}");
                    0
                }
            };
            if links > 0 {
                let index = rand::random_range(0..links);
                self.interact(session, Interaction::HoverLink { index }).await;
                self.pacing.hover.pause().await;
            }
        }
    }

    async fn interact(&self, session: &mut dyn PageSession, action: Interaction) {
        if let Err(e) = session.interact(action).await {
            log::debug!("Interaction failed: {e}");
        }
    }
}
