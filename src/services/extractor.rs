// src/services/extractor.rs

//! Listing extraction.
//!
//! Reads listing elements from a loaded page using the configured selectors.
//! Elements that fail to parse are skipped with a warning; they never abort
//! the page.

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Config, ListingRecord, SelectorConfig, split_meta};
use crate::page::{PageElement, parse_selector};
use crate::services::LoadedPage;
use crate::utils::jitter::Pacing;
use crate::utils::{normalize_whitespace, resolve};

/// Result of reading one page.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The listing container appeared before the deadline
    Complete(Vec<ListingRecord>),
    /// The deadline passed; holds whatever was readable
    TimedOutPartial(Vec<ListingRecord>),
}

impl Extraction {
    pub fn records(&self) -> &[ListingRecord] {
        match self {
            Self::Complete(records) | Self::TimedOutPartial(records) => records,
        }
    }

    pub fn into_records(self) -> Vec<ListingRecord> {
        match self {
            Self::Complete(records) | Self::TimedOutPartial(records) => records,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::TimedOutPartial(_))
    }
}

/// Turns listing elements into [`ListingRecord`]s.
pub struct ListingExtractor {
    selectors: SelectorConfig,
    /// Lowercased keywords; a title must contain one to be kept
    filters: Vec<String>,
    max_results: Option<usize>,
    pacing: Pacing,
}

impl ListingExtractor {
    /// Create an extractor, rejecting selectors that do not parse.
    pub fn new(
        selectors: SelectorConfig,
        filters: &[String],
        max_results: Option<usize>,
        pacing: Pacing,
    ) -> Result<Self> {
        for selector in [&selectors.listing, &selectors.title, &selectors.meta] {
            parse_selector(selector)?;
        }
        Ok(Self {
            selectors,
            filters: filters
                .iter()
                .map(|f| f.trim().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
            max_results,
            pacing,
        })
    }

    pub fn from_config(config: &Config, pacing: Pacing) -> Result<Self> {
        Self::new(
            config.selectors.clone(),
            &config.filters,
            config.max_results_per_url,
            pacing,
        )
    }

    /// Read every listing on `page`, stamping each with `scraped_at`.
    pub async fn extract(&self, page: &LoadedPage, scraped_at: DateTime<Utc>) -> Result<Extraction> {
        let appeared = page
            .session
            .wait_for_selector(&self.selectors.listing, page.timeout)
            .await?;
        if appeared {
            self.pacing.settle.pause().await;
        } else {
            log::warn!("Page load timeout - continuing with available content ({})", page.url);
        }

        let elements = page.session.query_all(&self.selectors.listing)?;
        log::debug!("Found {} listing elements on {}", elements.len(), page.url);

        let mut records = Vec::new();
        for element in &elements {
            if self.max_results.is_some_and(|max| records.len() >= max) {
                break;
            }
            self.pacing.per_element.pause().await;
            match self.parse_element(element, &page.url, scraped_at) {
                Ok(record) => {
                    if self.matches_filters(&record) {
                        records.push(record);
                    }
                }
                Err(e) => log::warn!("Skipping listing on {}: {e}", page.url),
            }
        }

        Ok(if appeared {
            Extraction::Complete(records)
        } else {
            Extraction::TimedOutPartial(records)
        })
    }

    /// Parse one listing element.
    pub fn parse_element(
        &self,
        element: &PageElement,
        page_url: &str,
        scraped_at: DateTime<Utc>,
    ) -> Result<ListingRecord> {
        let title_el = element
            .select_first(&self.selectors.title)?
            .ok_or_else(|| AppError::parse("listing has no title element"))?;
        let title = normalize_whitespace(title_el.text());
        let href = title_el
            .attr("href")
            .ok_or_else(|| AppError::parse(format!("title '{title}' has no link")))?;
        let link = resolve(page_url, href);

        let meta_el = element
            .select_first(&self.selectors.meta)?
            .ok_or_else(|| AppError::parse(format!("'{title}' has no meta element")))?;
        let (posted_time, location) = split_meta(meta_el.text(), &self.selectors.separator)?;

        ListingRecord::new(
            link,
            title,
            normalize_whitespace(&posted_time),
            normalize_whitespace(&location),
            scraped_at,
        )
    }

    fn matches_filters(&self, record: &ListingRecord) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let title = record.title.to_lowercase();
        self.filters.iter().any(|f| title.contains(f.as_str()))
    }
}
