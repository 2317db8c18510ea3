//! Listing record and per-cycle context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::url::listing_identity;

/// A listing extracted from a search results page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRecord {
    /// Stable identifier taken from the canonical link
    pub identity: String,

    /// Full URL to the listing
    pub link: String,

    /// Listing title
    pub title: String,

    /// Relative posting time as displayed ("3h ago")
    pub posted_time: String,

    /// Location as displayed
    pub location: String,

    /// When the record was last seen by an extraction cycle
    pub scraped_at: DateTime<Utc>,

    /// Set once a notification containing this record was delivered
    pub notified: bool,
}

impl ListingRecord {
    /// Build a validated, not-yet-notified record. The identity is derived
    /// from the link.
    pub fn new(
        link: impl Into<String>,
        title: impl Into<String>,
        posted_time: impl Into<String>,
        location: impl Into<String>,
        scraped_at: DateTime<Utc>,
    ) -> Result<Self> {
        let link = link.into();
        let identity = listing_identity(&link)
            .ok_or_else(|| AppError::parse(format!("cannot derive identity from '{link}'")))?;

        let record = Self {
            identity,
            link,
            title: title.into(),
            posted_time: posted_time.into(),
            location: location.into(),
            scraped_at,
            notified: false,
        };
        record.validate()?;
        Ok(record)
    }

    /// Reject records missing an identity, link or title.
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(AppError::parse("listing has an empty identity"));
        }
        if self.link.trim().is_empty() {
            return Err(AppError::parse(format!("listing {} has no link", self.identity)));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::parse(format!("listing {} has no title", self.identity)));
        }
        Ok(())
    }

    /// Format the record for display using a template.
    ///
    /// Supported placeholders:
    /// - `{id}`, `{title}`, `{link}`, `{location}`, `{posted}`
    pub fn format(&self, template: &str) -> String {
        template
            .replace("{id}", &self.identity)
            .replace("{title}", &self.title)
            .replace("{link}", &self.link)
            .replace("{location}", &self.location)
            .replace("{posted}", &self.posted_time)
    }
}

/// Split a listing's meta text into `(posted_time, location)`.
///
/// Only the first two fields are used, each trimmed. Text without the
/// separator is a parse error.
pub fn split_meta(meta: &str, separator: &str) -> Result<(String, String)> {
    let mut fields = meta.split(separator);
    match (fields.next(), fields.next()) {
        (Some(posted), Some(location)) => {
            Ok((posted.trim().to_string(), location.trim().to_string()))
        }
        _ => Err(AppError::parse(format!(
            "meta text '{}' lacks '{separator}'",
            meta.trim()
        ))),
    }
}

/// State shared by every URL visited during one cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// 1-based cycle counter since process start
    pub cycle: u64,

    /// Timestamp stamped onto every record extracted this cycle
    pub started_at: DateTime<Utc>,

    /// True until the first cycle completes; findings are discarded
    pub initial_run: bool,
}

impl CycleContext {
    pub fn new(cycle: u64, initial_run: bool) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            initial_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_meta() {
        let (posted, location) = split_meta("3h ago · Brooklyn", "·").unwrap();
        assert_eq!(posted, "3h ago");
        assert_eq!(location, "Brooklyn");
    }

    #[test]
    fn test_split_meta_ignores_extra_fields() {
        let (posted, location) = split_meta("1h ago · Queens · extra", "·").unwrap();
        assert_eq!(posted, "1h ago");
        assert_eq!(location, "Queens");
    }

    #[test]
    fn test_split_meta_missing_separator() {
        assert!(matches!(
            split_meta("3h ago Brooklyn", "·"),
            Err(AppError::Parse(_))
        ));
    }

    #[test]
    fn test_new_derives_identity() {
        let record = ListingRecord::new(
            "https://example.org/abc/d/widget/7001234567.html",
            "Free couch",
            "3h ago",
            "Brooklyn",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(record.identity, "7001234567");
        assert!(!record.notified);
    }

    #[test]
    fn test_new_rejects_empty_title() {
        let result = ListingRecord::new(
            "https://example.org/abc/d/widget/7001234567.html",
            "   ",
            "3h ago",
            "Brooklyn",
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_format() {
        let record = ListingRecord::new(
            "https://example.org/zip/d/chair/42.html",
            "Chair",
            "1h ago",
            "Queens",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(record.format("[{location}] {title} ({id})"), "[Queens] Chair (42)");
    }
}
