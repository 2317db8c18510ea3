// src/error.rs

//! Unified error handling for the listing watcher.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote response was absent or carried an error status
    #[error("Navigation to {url} failed: {}", describe_status(.status))]
    Navigation { url: String, status: Option<u16> },

    /// A navigation or selector deadline passed
    #[error("Timed out after {timeout_ms} ms while {context}")]
    Timeout { context: String, timeout_ms: u64 },

    /// A single listing element could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Record store failure
    #[error("Storage error: {message}")]
    Storage { message: String, retryable: bool },

    /// Notification could not be delivered
    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".to_string(),
    }
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a navigation error for a URL.
    pub fn navigation(url: impl Into<String>, status: Option<u16>) -> Self {
        Self::Navigation {
            url: url.into(),
            status,
        }
    }

    /// Create a timeout error with context.
    pub fn timeout(context: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            timeout_ms,
        }
    }

    /// Create a per-element parse error.
    pub fn parse(message: impl fmt::Display) -> Self {
        Self::Parse(message.to_string())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display, retryable: bool) -> Self {
        Self::Storage {
            message: message.to_string(),
            retryable,
        }
    }

    /// Create a dispatch error.
    pub fn dispatch(message: impl fmt::Display) -> Self {
        Self::Dispatch(message.to_string())
    }

    /// Whether the retry controller may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Storage { retryable: true, .. }
        )
    }

    /// Whether this error came from the record store.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

/// Primary SQLite result codes for a locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether a SQLite (possibly extended) result code means the database was
/// busy or locked. Extended codes carry the primary code in the low byte.
fn is_transient_sqlite_code(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let retryable = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|c| is_transient_sqlite_code(&c)),
            _ => false,
        };
        Self::storage(err, retryable)
    }
}
