//! Encoding repair: strips invalid UTF-8 from downloaded text files in place.
//!
//! Repair works on raw bytes. Valid UTF-8 runs are copied unchanged and only
//! the invalid sequences between them are dropped (or replaced with U+FFFD),
//! so repairing an already repaired file is a no-op.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::{RepairConfig, RepairPolicy};
use crate::layout::{has_extension, list_files, write_atomic};
use crate::progress::{PipelineEvent, ProgressReporter, SilentReporter, Stage};
use crate::stats::{StageOutcome, StageStats};
use crate::AppError;

/// Extensions of files the repair stage treats as text.
pub const TEXT_EXTENSIONS: &[&str] = &["csv", "tsv", "txt", "json", "xml"];

const REPLACEMENT: &str = "\u{FFFD}";

/// Result of repairing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The file was valid UTF-8 and was not touched.
    Clean,
    /// The file was rewritten; `removed` invalid bytes were dropped or replaced.
    Repaired { removed: usize },
}

/// Cleans `bytes` according to `policy`.
///
/// Returns `None` if `bytes` is already valid UTF-8, otherwise the cleaned
/// content and the number of invalid bytes it no longer contains.
///
/// # Examples
///
/// ```
/// use granary_core::config::RepairPolicy;
/// use granary_core::repair::repair_bytes;
///
/// let (fixed, removed) = repair_bytes(b"citt\xe0;2024", RepairPolicy::Drop).unwrap();
/// assert_eq!(fixed, b"citt;2024");
/// assert_eq!(removed, 1);
/// assert!(repair_bytes(&fixed, RepairPolicy::Drop).is_none());
/// ```
pub fn repair_bytes(bytes: &[u8], policy: RepairPolicy) -> Option<(Vec<u8>, usize)> {
    if std::str::from_utf8(bytes).is_ok() {
        return None;
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut removed = 0;
    for chunk in bytes.utf8_chunks() {
        out.extend_from_slice(chunk.valid().as_bytes());
        let invalid = chunk.invalid();
        if !invalid.is_empty() {
            removed += invalid.len();
            if policy == RepairPolicy::Replace {
                out.extend_from_slice(REPLACEMENT.as_bytes());
            }
        }
    }
    Some((out, removed))
}

/// Returns true for files the repair stage should process.
pub fn is_text_file(path: &Path) -> bool {
    has_extension(path, TEXT_EXTENSIONS)
}

/// Service that repairs stored files, one at a time.
#[derive(Debug, Clone, Default)]
pub struct RepairService {
    config: RepairConfig,
}

impl RepairService {
    pub fn new(config: RepairConfig) -> Self {
        Self { config }
    }

    /// Repairs a single file in place.
    ///
    /// # Errors
    ///
    /// `AppError::EncodingError` if a text file contains NUL bytes (binary or
    /// UTF-16 content); the file is left untouched. I/O errors otherwise.
    pub async fn repair(&self, path: &Path) -> Result<RepairOutcome, AppError> {
        let bytes = tokio::fs::read(path).await?;

        if is_text_file(path) && bytes.contains(&0) {
            return Err(AppError::EncodingError(format!(
                "{} contains NUL bytes, not a text file",
                path.display()
            )));
        }

        match repair_bytes(&bytes, self.config.policy) {
            None => Ok(RepairOutcome::Clean),
            Some((fixed, removed)) => {
                write_atomic(path, &fixed).await?;
                Ok(RepairOutcome::Repaired { removed })
            }
        }
    }

    /// Repairs every text file under `dir`.
    ///
    /// Repaired files count as succeeded, clean files as skipped. Per-file
    /// errors are logged and counted, never fatal.
    pub async fn repair_dir(&self, dir: &Path) -> Result<StageStats, AppError> {
        self.repair_dir_with_progress(dir, &SilentReporter, CancellationToken::new())
            .await
    }

    pub async fn repair_dir_with_progress<R: ProgressReporter>(
        &self,
        dir: &Path,
        reporter: &R,
        cancel_token: CancellationToken,
    ) -> Result<StageStats, AppError> {
        tokio::fs::metadata(dir).await?;
        let files = list_files(dir, is_text_file);

        let mut stats = StageStats::new();
        for path in files {
            if cancel_token.is_cancelled() {
                reporter.report(PipelineEvent::Cancelled {
                    stage: Stage::Repair,
                });
                break;
            }

            match self.repair(&path).await {
                Ok(RepairOutcome::Clean) => stats.record(StageOutcome::Skipped),
                Ok(RepairOutcome::Repaired { removed }) => {
                    stats.record(StageOutcome::Succeeded);
                    reporter.report(PipelineEvent::FileRepaired {
                        path: &path,
                        removed,
                    });
                }
                Err(e) => {
                    stats.record(StageOutcome::Failed);
                    reporter.report(PipelineEvent::FileFailed {
                        stage: Stage::Repair,
                        path: &path,
                        error: &e.to_string(),
                    });
                }
            }
        }

        reporter.report(PipelineEvent::StageCompleted {
            stage: Stage::Repair,
            stats: &stats,
        });
        Ok(stats)
    }
}
