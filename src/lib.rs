// src/lib.rs

//! listing-watch library
//!
//! Periodically visits classifieds search pages, extracts listings,
//! deduplicates them against a record store, and notifies about new ones.

pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod page;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;
