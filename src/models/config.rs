//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::page::parse_selector;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

static TABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid table regex"));

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Search result pages visited every cycle, in order
    #[serde(default)]
    pub urls: Vec<String>,

    /// Send one notification per cycle instead of one per listing
    #[serde(default = "defaults::combine_notifications")]
    pub combine_notifications: bool,

    /// Minimum seconds between two dispatches (0 disables)
    #[serde(default)]
    pub notification_cooldown_secs: u64,

    /// Title keywords; a listing is kept when any keyword matches
    #[serde(default)]
    pub filters: Vec<String>,

    /// Cap on listings taken from a single page
    #[serde(default)]
    pub max_results_per_url: Option<usize>,

    /// Record store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Email notification settings
    #[serde(default)]
    pub email: EmailConfig,

    /// Page retrieval and cycle timing
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Selectors for the listing page structure
    #[serde(default)]
    pub selectors: SelectorConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Collect every configuration problem.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.urls.is_empty() {
            problems.push("At least one URL is required".to_string());
        }
        for url in &self.urls {
            match url::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => problems.push(format!("Invalid URL format: {url}")),
            }
        }

        if self.max_results_per_url == Some(0) {
            problems.push("max_results_per_url must be > 0".to_string());
        }

        problems.extend(self.database.problems());
        problems.extend(self.email.problems());
        problems.extend(self.crawler.problems());
        problems.extend(self.selectors.problems());
        problems
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(problems.join("; ")))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: defaults::urls(),
            combine_notifications: defaults::combine_notifications(),
            notification_cooldown_secs: 0,
            filters: Vec::new(),
            max_results_per_url: None,
            database: DatabaseConfig::default(),
            email: EmailConfig::default(),
            crawler: CrawlerConfig::default(),
            selectors: SelectorConfig::default(),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "defaults::database_url")]
    pub url: String,

    /// Table name; derived from the config file name when absent
    #[serde(default)]
    pub table: Option<String>,

    /// Connection pool size
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "defaults::acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Resolve the table name, falling back to `listings_<config file stem>`.
    pub fn table_name(&self, config_path: &Path) -> String {
        if let Some(table) = &self.table {
            return table.clone();
        }
        let stem: String = config_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if stem.is_empty() {
            "listings".to_string()
        } else {
            format!("listings_{stem}")
        }
    }

    /// Filesystem path of the database file, if the URL names one.
    pub fn file_path(&self) -> Option<&str> {
        let rest = self
            .url
            .strip_prefix("sqlite://")
            .or_else(|| self.url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or(rest);
        if path.is_empty() || path == ":memory:" {
            None
        } else {
            Some(path)
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.url.starts_with("sqlite:") {
            problems.push(format!("database.url must be a sqlite URL: {}", self.url));
        }
        if let Some(table) = &self.table {
            if !is_valid_table_name(table) {
                problems.push(format!("database.table is not a valid identifier: {table}"));
            }
        }
        if self.max_connections == 0 {
            problems.push("database.max_connections must be > 0".to_string());
        }
        problems
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::database_url(),
            table: None,
            max_connections: defaults::max_connections(),
            acquire_timeout_secs: defaults::acquire_timeout(),
        }
    }
}

/// Whether `name` can be interpolated into SQL as a table identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_PATTERN.is_match(name)
}

/// Email notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Send email at all; when false notifications are only logged
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub smtp_server: String,

    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,

    /// Upgrade the connection with STARTTLS
    #[serde(default = "defaults::smtp_use_tls")]
    pub smtp_use_tls: bool,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub from_address: String,

    #[serde(default)]
    pub to_addresses: Vec<String>,

    /// Prepended to every subject line
    #[serde(
        default = "defaults::subject_prefix",
        alias = "notification_subject_prefix"
    )]
    pub subject_prefix: String,

    /// Delivery attempts for transient SMTP failures
    #[serde(default = "defaults::smtp_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between delivery attempts
    #[serde(default = "defaults::smtp_retry_delay")]
    pub retry_delay_secs: u64,

    /// SMTP command timeout
    #[serde(default = "defaults::smtp_timeout")]
    pub timeout_secs: u64,
}

impl EmailConfig {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.enabled {
            return problems;
        }

        if self.smtp_server.trim().is_empty() {
            problems.push("SMTP server is required when email is enabled".to_string());
        }
        if self.smtp_port == 0 {
            problems.push("SMTP port is required when email is enabled".to_string());
        }
        if self.username.is_empty() {
            problems.push("Username is required when email is enabled".to_string());
        }
        if self.password.is_empty() {
            problems.push("Password is required when email is enabled".to_string());
        }
        if self.from_address.is_empty() {
            problems.push("From address is required when email is enabled".to_string());
        }
        if self.to_addresses.is_empty() {
            problems.push(
                "At least one recipient address is required when email is enabled".to_string(),
            );
        } else {
            for address in std::iter::once(&self.from_address).chain(&self.to_addresses) {
                if !address.is_empty() && !EMAIL_PATTERN.is_match(address) {
                    problems.push(format!("Invalid email address format: {address}"));
                }
            }
        }
        if self.max_attempts == 0 {
            problems.push("email.max_attempts must be > 0".to_string());
        }
        problems
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: defaults::smtp_port(),
            smtp_use_tls: defaults::smtp_use_tls(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            to_addresses: Vec::new(),
            subject_prefix: defaults::subject_prefix(),
            max_attempts: defaults::smtp_max_attempts(),
            retry_delay_secs: defaults::smtp_retry_delay(),
            timeout_secs: defaults::smtp_timeout(),
        }
    }
}

/// Page retrieval and cycle timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Base navigation and selector timeout in milliseconds
    #[serde(default = "defaults::page_timeout")]
    pub page_timeout_ms: u64,

    /// The timeout is re-rolled within +/- this many milliseconds
    #[serde(default = "defaults::timeout_jitter")]
    pub timeout_jitter_ms: u64,

    /// Attempts per URL before giving up for the cycle
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Lower bound of the sleep between cycles
    #[serde(default = "defaults::min_wait")]
    pub min_wait_secs: u64,

    /// Upper bound of the sleep between cycles
    #[serde(default = "defaults::max_wait")]
    pub max_wait_secs: u64,

    /// Pool of User-Agent strings; one is picked per session
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,
}

impl CrawlerConfig {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.page_timeout_ms == 0 {
            problems.push("crawler.page_timeout_ms must be > 0".to_string());
        }
        if self.timeout_jitter_ms >= self.page_timeout_ms {
            problems.push("crawler.timeout_jitter_ms must be < page_timeout_ms".to_string());
        }
        if self.max_attempts == 0 {
            problems.push("crawler.max_attempts must be > 0".to_string());
        }
        if self.min_wait_secs > self.max_wait_secs {
            problems.push("crawler.min_wait_secs must be <= max_wait_secs".to_string());
        }
        if self.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            problems.push("crawler.user_agents is empty".to_string());
        }
        problems
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_timeout_ms: defaults::page_timeout(),
            timeout_jitter_ms: defaults::timeout_jitter(),
            max_attempts: defaults::max_attempts(),
            min_wait_secs: defaults::min_wait(),
            max_wait_secs: defaults::max_wait(),
            user_agents: defaults::user_agents(),
        }
    }
}

/// CSS selectors describing a search results page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Selector for each listing in the results
    #[serde(default = "defaults::listing_selector")]
    pub listing: String,

    /// Selector for the title link within a listing
    #[serde(default = "defaults::title_selector")]
    pub title: String,

    /// Selector for the "posted · location" text within a listing
    #[serde(default = "defaults::meta_selector")]
    pub meta: String,

    /// Glyph separating posted time from location in the meta text
    #[serde(default = "defaults::meta_separator")]
    pub separator: String,
}

impl SelectorConfig {
    fn problems(&self) -> Vec<String> {
        let mut problems: Vec<String> = [&self.listing, &self.title, &self.meta]
            .into_iter()
            .filter_map(|s| parse_selector(s).err().map(|e| e.to_string()))
            .collect();
        if self.separator.is_empty() {
            problems.push("selectors.separator is empty".to_string());
        }
        problems
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            listing: defaults::listing_selector(),
            title: defaults::title_selector(),
            meta: defaults::meta_selector(),
            separator: defaults::meta_separator(),
        }
    }
}

mod defaults {
    pub fn urls() -> Vec<String> {
        vec!["https://newyork.craigslist.org/search/zip".into()]
    }
    pub fn combine_notifications() -> bool {
        true
    }

    // Database defaults
    pub fn database_url() -> String {
        "sqlite://data/listings.db".into()
    }
    pub fn max_connections() -> u32 {
        5
    }
    pub fn acquire_timeout() -> u64 {
        30
    }

    // Email defaults
    pub fn smtp_port() -> u16 {
        587
    }
    pub fn smtp_use_tls() -> bool {
        true
    }
    pub fn subject_prefix() -> String {
        "[listing-watch]".into()
    }
    pub fn smtp_max_attempts() -> u32 {
        3
    }
    pub fn smtp_retry_delay() -> u64 {
        5
    }
    pub fn smtp_timeout() -> u64 {
        30
    }

    // Crawler defaults
    pub fn page_timeout() -> u64 {
        5000
    }
    pub fn timeout_jitter() -> u64 {
        1000
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn min_wait() -> u64 {
        45
    }
    pub fn max_wait() -> u64 {
        90
    }
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Edge/115.0.1901.188".into(),
        ]
    }

    // Selector defaults
    pub fn listing_selector() -> String {
        ".cl-search-result".into()
    }
    pub fn title_selector() -> String {
        ".posting-title".into()
    }
    pub fn meta_selector() -> String {
        ".meta".into()
    }
    pub fn meta_separator() -> String {
        "·".into()
    }
}
