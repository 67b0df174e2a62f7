use thiserror::Error;

/// Application-wide error types.
///
/// The four pipeline variants ([`AppError::CatalogError`],
/// [`AppError::DownloadError`], [`AppError::EncodingError`] and
/// [`AppError::IngestError`]) are raised per unit of work (package, resource,
/// file) and are always caught at that boundary by the stage services: they
/// are logged and counted, never propagated out of a run.
///
/// # Error Conversion
///
/// Library errors convert automatically through `#[from]`:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `std::io::Error` → `AppError::IoError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `csv::Error` → `AppError::CsvError`
///
/// # Examples
///
/// ```
/// use granary_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::CatalogError("package_show returned success: false".to_string()))
/// }
///
/// assert!(example().is_err());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Catalog metadata could not be fetched or parsed.
    ///
    /// Raised for failed metadata requests, `success: false` responses and
    /// malformed package or resource entries.
    #[error("Catalog error: {0}")]
    CatalogError(String),

    /// A resource payload could not be downloaded.
    ///
    /// Covers transport failures and non-success HTTP statuses while streaming.
    /// No file is left at the final path, so the next run retries it.
    #[error("Download error: {0}")]
    DownloadError(String),

    /// A stored file cannot be decoded as text under any tolerated fallback.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Table creation or bulk load failed for one resource.
    #[error("Ingest error: {0}")]
    IngestError(String),

    /// Database operation failed.
    ///
    /// This error wraps all errors from SQLx database operations, including
    /// connection failures, query errors, and constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Invalid catalog URL provided.
    ///
    /// This error occurs when the provided catalog URL is malformed
    /// or cannot be used to construct valid API endpoints.
    #[error("Invalid catalog URL: {0}")]
    InvalidCatalogUrl(String),

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Configuration error.
    ///
    /// Raised for invalid settings (e.g. a zero download concurrency) and for
    /// unreadable or malformed configuration files.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check --db-host/--db-port or DATABASE_URL.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::InvalidCatalogUrl(url) => {
                format!(
                    "Invalid catalog URL: {}\n   Example: https://bdap-opendata.rgs.mef.gov.it/SpodCkanApi/api/3/action/",
                    url
                )
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The catalog may be overloaded. Re-run the stage later.",
                    secs
                )
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your command line flags and configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if re-running the same unit later may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// use granary_core::error::AppError;
    ///
    /// assert!(AppError::Timeout(30).is_retryable());
    /// assert!(AppError::DownloadError("HTTP 503".to_string()).is_retryable());
    /// assert!(!AppError::EncodingError("binary content".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::DownloadError(_)
                | AppError::CatalogError(_)
        )
    }
}
