//! Deterministic on-disk layout of harvested files.
//!
//! ```text
//! <root>/
//!   <package>/
//!     metadata.json
//!     <resource>.<ext>
//!     <resource>.<ext>.partial   (in-flight download, never read)
//! ```
//!
//! The layout is the durable record of download progress: a non-empty file at
//! a resource's final path means that resource is done.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::error::AppError;
use crate::models::Resource;

/// Name of the per-package metadata document.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Suffix of in-flight files that have not been renamed into place yet.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Maps catalog identifiers to paths under a root directory.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file of one package.
    pub fn package_dir(&self, package_id: &str) -> PathBuf {
        self.root.join(sanitize_path_component(package_id))
    }

    /// Path of the package's raw metadata document.
    pub fn metadata_path(&self, package_id: &str) -> PathBuf {
        self.package_dir(package_id).join(METADATA_FILE_NAME)
    }

    /// Final path of a resource payload.
    pub fn resource_path(&self, resource: &Resource) -> PathBuf {
        self.package_dir(&resource.package_id).join(format!(
            "{}.{}",
            sanitize_path_component(&resource.id),
            resource.extension()
        ))
    }
}

/// Returns the temporary sibling used while `path` is being written.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use granary_core::layout::partial_path;
///
/// assert_eq!(
///     partial_path(Path::new("/data/pkg/res.csv")),
///     Path::new("/data/pkg/res.csv.partial")
/// );
/// ```
pub fn partial_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(PARTIAL_SUFFIX);
    PathBuf::from(os)
}

/// Returns true for in-flight files left by an interrupted writer.
pub fn is_partial(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

/// Returns true if `path` holds a finished artifact (exists and is non-empty).
pub async fn is_complete(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Writes `contents` to `path` through a `.partial` sibling and a rename, so
/// readers see either the old file or the complete new one.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result.map_err(AppError::from)
}

/// Lists the finished files under `root` accepted by `keep`, sorted by path.
///
/// In-flight `.partial` files and package metadata documents are never
/// returned. Unreadable entries are logged and skipped.
pub fn list_files(root: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file()
            || is_partial(path)
            || path.file_name().is_some_and(|n| n == METADATA_FILE_NAME)
        {
            continue;
        }
        if keep(path) {
            files.push(path.to_path_buf());
        }
    }
    files
}

/// Returns true if the file extension (case-insensitive) is one of `extensions`.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Makes a catalog identifier safe to use as a single path component.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
/// Leading dots are stripped so the result can never be `.`/`..` or hidden.
pub fn sanitize_path_component(raw: &str) -> String {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_start_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
