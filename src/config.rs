// src/config.rs

//! Configuration loading and startup wiring.
//!
//! Turns a config file into the pieces the scheduler needs: a validated
//! [`Config`], an opened record store, and a dispatcher.

use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::storage::{MemoryStore, RecordStore, SqliteStore};

/// Load and validate configuration from a TOML file.
///
/// Every problem is logged before the combined error is returned.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .map_err(|e| AppError::config(format!("Failed to load {}: {e}", path.display())))?;

    let problems = config.problems();
    if !problems.is_empty() {
        for problem in &problems {
            log::error!("Configuration error: {problem}");
        }
        return Err(AppError::validation(problems.join("; ")));
    }

    log::info!(
        "Loaded configuration from {} ({} URL(s), email {})",
        path.display(),
        config.urls.len(),
        if config.email.enabled { "enabled" } else { "disabled" }
    );
    Ok(config)
}

/// Open the record store for `config`.
///
/// The table name defaults to one derived from the config file name, so
/// several watchers can share one database file.
pub async fn open_store(
    config: &Config,
    config_path: &Path,
    ephemeral: bool,
) -> Result<Arc<dyn RecordStore>> {
    if ephemeral {
        log::warn!("Using an in-memory record store; nothing is persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let table = config.database.table_name(config_path);
    let store = SqliteStore::connect(&config.database, &table).await?;
    Ok(Arc::new(store))
}
