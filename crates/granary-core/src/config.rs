//! Configuration types for Granary components.
//!
//! Every stage takes a small settings struct with sensible defaults. The CLI
//! fills them from flags and environment variables; the optional
//! `granary.toml` file supplies the catalog URL, group list and format filter
//! when the flags are omitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::error::AppError;

// =============================================================================
// HTTP / Catalog
// =============================================================================

/// HTTP client configuration for catalog and download requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Longest idle gap between two reads of a response.
    ///
    /// There is no limit on total request time, so large payloads on slow
    /// links still complete.
    pub read_timeout: Duration,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Rewrite `http://` resource URLs to `https://`.
    pub upgrade_insecure: bool,
    /// Page size for `package_list` pagination.
    pub page_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            user_agent: concat!("granary/", env!("CARGO_PKG_VERSION")).to_string(),
            upgrade_insecure: true,
            page_size: 1000,
        }
    }
}

// =============================================================================
// Relational store
// =============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// Connection parameters of the relational store.
///
/// A full `url` wins over the individual fields.
#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            url: None,
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("url", &self.url.as_ref().map(|_| "***"))
            .finish()
    }
}

impl StoreConfig {
    /// Builds sqlx connection options from these parameters.
    pub fn connect_options(&self) -> Result<PgConnectOptions, AppError> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| AppError::ConfigError(format!("Invalid database URL: {}", e)));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

// =============================================================================
// Stage settings
// =============================================================================

/// Download stage configuration.
///
/// The pool size is not part of it: it is a required argument of
/// [`DownloadService::run`](crate::download::DownloadService::run).
#[derive(Debug, Clone, Default)]
pub struct DownloadConfig {
    /// Restrict the run to these catalog groups. Empty means the whole catalog.
    pub groups: Vec<String>,
    /// Only fetch resources whose format or MIME type matches. Empty means all.
    pub formats: Vec<String>,
}

impl DownloadConfig {
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_formats(mut self, formats: Vec<String>) -> Self {
        self.formats = formats;
        self
    }
}

/// Rejects a download pool size the pool cannot run with.
pub fn validate_max_concurrency(max_concurrency: usize) -> Result<(), AppError> {
    if max_concurrency < 1 {
        return Err(AppError::ConfigError(
            "max_concurrency must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// What to do with byte sequences that are not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairPolicy {
    /// Delete invalid sequences.
    #[default]
    Drop,
    /// Replace each invalid sequence with U+FFFD.
    Replace,
}

impl fmt::Display for RepairPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for RepairPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "replace" => Ok(Self::Replace),
            _ => Err(AppError::ConfigError(format!(
                "Unknown repair policy: '{}'. Valid options: drop, replace",
                s
            ))),
        }
    }
}

/// Encoding repair configuration.
#[derive(Debug, Clone, Default)]
pub struct RepairConfig {
    pub policy: RepairPolicy,
}

/// Ingest stage configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Number of data rows used for type inference.
    pub sample_rows: usize,
    /// Skip resources whose table already holds the file's row count.
    pub skip_loaded: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sample_rows: 100_000,
            skip_loaded: false,
        }
    }
}

impl IngestConfig {
    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows.max(1);
        self
    }

    pub fn with_skip_loaded(mut self, skip_loaded: bool) -> Self {
        self.skip_loaded = skip_loaded;
        self
    }
}

// =============================================================================
// Harvest configuration file (granary.toml)
// =============================================================================

/// Contents of `granary.toml`.
///
/// # Example
///
/// ```toml
/// [catalog]
/// url = "https://bdap-opendata.rgs.mef.gov.it/SpodCkanApi/api/3/action/"
/// groups = ["bilanci-enti-locali"]
/// formats = ["csv"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub catalog: CatalogEntry,
}

/// The catalog to harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Base URL of the CKAN catalog or its action API.
    pub url: String,
    /// Groups to harvest; empty means every package.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Format filter for resources; empty means every resource.
    #[serde(default)]
    pub formats: Vec<String>,
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "granary.toml";

/// Returns the default configuration directory path (`~/.config/granary/`).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("granary"))
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Granary harvest configuration
#
# Usage:
#   granary download --output ./dataset --max-concurrency 8
#   granary run --output ./dataset --max-concurrency 8
#
# Command line flags (--catalog, --group, --format) override these values.

[catalog]
# Italian State General Accounting Department open data catalog
url = "https://bdap-opendata.rgs.mef.gov.it/SpodCkanApi/api/3/action/"

# Restrict the harvest to some catalog groups (empty = whole catalog)
groups = []

# Only download resources of these formats (empty = every resource),
# e.g. formats = ["csv", "json"]
formats = []
"#;

/// Loads the harvest configuration from a TOML file.
///
/// * `Ok(Some(config))` - configuration loaded
/// * `Ok(None)` - no file at the default location and none could be created
/// * `Err(e)` - the file is missing at a custom path, unreadable, or invalid
///
/// When the default file does not exist, a template is written there first.
pub fn load_harvest_config(path: Option<PathBuf>) -> Result<Option<HarvestConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            if let Err(e) = create_default_config(&config_path) {
                tracing::warn!("Could not create default config template: {}", e);
                return Ok(None);
            }
        } else {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: HarvestConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
