// src/models/mod.rs

//! Domain models for the listing watcher.
//!
//! This module contains the data structures shared across the pipeline:
//! the listing record, the per-cycle context and the configuration.

mod config;
mod listing;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, DatabaseConfig, EmailConfig, SelectorConfig, is_valid_table_name,
};
pub use listing::{CycleContext, ListingRecord, split_meta};
