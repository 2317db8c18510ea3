// src/page/http.rs

//! Static page source backed by `reqwest`.
//!
//! Each session gets its own client so cookies and connection state are
//! never shared between visits. Documents are served as delivered; there is
//! no script execution, so pointer interactions are accepted and ignored.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

use super::{Interaction, PageElement, PageSession, PageSource, SessionIdentity, select_in_document};
use crate::error::{AppError, Result};

/// Opens one fresh HTTP client per session.
#[derive(Debug, Clone, Default)]
pub struct HttpPageSource;

impl HttpPageSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn open_session(&self, identity: &SessionIdentity) -> Result<Box<dyn PageSession>> {
        let client = create_client(identity)?;
        log::debug!(
            "Opened session ua={} viewport={}x{} tz={}",
            identity.user_agent,
            identity.viewport.0,
            identity.viewport.1,
            identity.timezone
        );
        Ok(Box::new(HttpSession {
            client,
            timeout: identity.timeout,
            document: None,
        }))
    }
}

/// Create a client presenting the session identity.
fn create_client(identity: &SessionIdentity) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
    );
    let language = HeaderValue::from_str(&format!("{},en;q=0.9", identity.locale))
        .map_err(|e| AppError::config(format!("invalid locale '{}': {e}", identity.locale)))?;
    headers.insert(ACCEPT_LANGUAGE, language);

    let client = reqwest::Client::builder()
        .user_agent(&identity.user_agent)
        .default_headers(headers)
        .timeout(identity.timeout)
        .build()?;
    Ok(client)
}

struct HttpSession {
    client: reqwest::Client,
    timeout: Duration,
    document: Option<String>,
}

impl HttpSession {
    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn navigate(&mut self, url: &str) -> Result<Option<u16>> {
        self.document = None;

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(AppError::timeout(
                    format!("navigating to {url}"),
                    self.timeout_ms(),
                ));
            }
            Err(e) => {
                log::warn!("No response from {url}: {e}");
                return Ok(None);
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => self.document = Some(body),
            Err(e) if e.is_timeout() => {
                return Err(AppError::timeout(
                    format!("reading body of {url}"),
                    self.timeout_ms(),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Some(status))
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        // Static documents never change after load.
        Ok(!self.query_all(selector)?.is_empty())
    }

    fn query_all(&self, selector: &str) -> Result<Vec<PageElement>> {
        match &self.document {
            Some(document) => select_in_document(document, selector),
            None => Err(AppError::validation("no document loaded in session")),
        }
    }

    async fn interact(&mut self, action: Interaction) -> Result<()> {
        log::trace!("Ignoring {action:?} on static document");
        Ok(())
    }
}
