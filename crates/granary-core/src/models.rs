//! Catalog domain models.
//!
//! A [`Package`] groups the [`Resource`]s the catalog publishes together.
//! Both are immutable once fetched and are sourced entirely from the remote
//! catalog; the local path of a resource is derived by
//! [`StorageLayout`](crate::layout::StorageLayout), never stored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog-level grouping of resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    /// Package identifier as used by the catalog API.
    pub id: String,
    /// Downloadable resources listed by the package.
    pub resources: Vec<Resource>,
    /// Raw `package_show` payload, persisted as `metadata.json`.
    pub metadata: Value,
}

impl Package {
    /// Returns the identifiers of all resources in this package.
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }
}

/// One downloadable unit: a CSV file, a JSON document or any other payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    /// Resource identifier, unique within the catalog.
    pub id: String,
    /// Identifier of the parent package.
    pub package_id: String,
    /// Download URL of the payload.
    pub url: String,
    /// Human-readable name, if the catalog provides one.
    pub name: Option<String>,
    /// Declared format (e.g. `CSV`, `JSON`), as written by the publisher.
    pub format: Option<String>,
    /// Declared MIME type (e.g. `text/csv`).
    pub mimetype: Option<String>,
}

impl Resource {
    /// Returns the file extension for the stored payload.
    ///
    /// Prefers the declared format, then the extension of the URL path, then
    /// a known MIME type, and falls back to `bin`.
    ///
    /// # Examples
    ///
    /// ```
    /// use granary_core::models::Resource;
    ///
    /// let resource = Resource {
    ///     id: "r1".to_string(),
    ///     package_id: "p1".to_string(),
    ///     url: "https://example.com/files/data.CSV?download=1".to_string(),
    ///     name: None,
    ///     format: None,
    ///     mimetype: None,
    /// };
    /// assert_eq!(resource.extension(), "csv");
    /// ```
    pub fn extension(&self) -> String {
        let declared = self
            .format
            .as_deref()
            .map(|f| f.trim().trim_start_matches('.').to_lowercase())
            .filter(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_alphanumeric()));
        if let Some(ext) = declared {
            return ext;
        }

        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .rsplit('/')
            .next()
            .unwrap_or_default();
        match path.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty()
                    && !ext.is_empty()
                    && ext.len() <= 5
                    && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                ext.to_lowercase()
            }
            _ => self
                .mimetype
                .as_deref()
                .and_then(extension_for_mimetype)
                .unwrap_or("bin")
                .to_string(),
        }
    }

    /// Returns true if the declared format or MIME type matches one of `formats`.
    ///
    /// Matching is case-insensitive. An empty filter matches every resource.
    pub fn matches_formats(&self, formats: &[String]) -> bool {
        if formats.is_empty() {
            return true;
        }
        let extension = self.extension();
        formats.iter().any(|wanted| {
            wanted.eq_ignore_ascii_case(&extension)
                || self
                    .format
                    .as_deref()
                    .is_some_and(|f| f.trim().eq_ignore_ascii_case(wanted))
                || self
                    .mimetype
                    .as_deref()
                    .is_some_and(|m| m.trim().eq_ignore_ascii_case(wanted))
        })
    }
}

/// Extension for the MIME types whose files later stages pick up.
fn extension_for_mimetype(mimetype: &str) -> Option<&'static str> {
    let essence = mimetype.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "text/csv" | "application/csv" => Some("csv"),
        "application/json" => Some("json"),
        "text/xml" | "application/xml" => Some("xml"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}
