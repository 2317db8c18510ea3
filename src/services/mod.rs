//! Service layer for the watcher.
//!
//! This module contains the per-URL work of a cycle:
//! - Page acquisition (`PageAcquirer`)
//! - Listing extraction (`ListingExtractor`)

mod acquirer;
mod extractor;

pub use acquirer::{LoadedPage, PageAcquirer};
pub use extractor::{Extraction, ListingExtractor};
