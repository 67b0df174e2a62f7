//! Progress reporting for the pipeline stages.
//!
//! Stage services emit [`PipelineEvent`]s through a [`ProgressReporter`] so
//! the library never decides how progress is shown. The CLI uses
//! [`TracingReporter`]; library defaults and tests use [`SilentReporter`].

use std::path::Path;

use tracing::{info, warn};

use crate::stats::StageStats;

/// Pipeline stage, used to label events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Repair,
    Ingest,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Repair => write!(f, "repair"),
            Self::Ingest => write!(f, "ingest"),
        }
    }
}

/// Events emitted while a stage runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    /// The package list has been enumerated.
    PackagesFound { count: usize },
    /// Package details resolved into this many resources to consider.
    ResourcesFound { count: usize },
    /// A package's details could not be fetched.
    PackageFailed { package_id: &'a str, error: &'a str },
    /// A resource payload was written to its final path.
    ResourceDownloaded { resource_id: &'a str, bytes: u64 },
    /// A resource download failed; it will be retried on the next run.
    ///
    /// `retryable` is false when the cause is unlikely to clear by itself.
    ResourceFailed {
        resource_id: &'a str,
        error: &'a str,
        retryable: bool,
    },
    /// Invalid byte sequences were removed from a file.
    FileRepaired { path: &'a Path, removed: usize },
    /// A file was loaded into a table.
    TableLoaded {
        path: &'a Path,
        table: &'a str,
        rows: u64,
    },
    /// A file could not be processed by the repair or ingest stage.
    FileFailed {
        stage: Stage,
        path: &'a Path,
        error: &'a str,
    },
    /// The stage stopped early on cancellation.
    Cancelled { stage: Stage },
    /// The stage finished.
    StageCompleted { stage: Stage, stats: &'a StageStats },
}

/// Receives pipeline events.
pub trait ProgressReporter: Send + Sync {
    /// Called when a pipeline event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Reporter that logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::PackagesFound { count } => {
                info!(count, "Packages found in catalog");
            }
            PipelineEvent::ResourcesFound { count } => {
                info!(count, "Resources to consider");
            }
            PipelineEvent::PackageFailed { package_id, error } => {
                warn!(package = package_id, %error, "Failed to fetch package details");
            }
            PipelineEvent::ResourceDownloaded { resource_id, bytes } => {
                info!(resource = resource_id, bytes, "Downloaded");
            }
            PipelineEvent::ResourceFailed {
                resource_id,
                error,
                retryable,
            } => {
                warn!(resource = resource_id, %error, retryable, "Download failed");
            }
            PipelineEvent::FileRepaired { path, removed } => {
                info!(path = %path.display(), removed, "Repaired invalid UTF-8");
            }
            PipelineEvent::TableLoaded { path, table, rows } => {
                info!(path = %path.display(), table, rows, "Loaded");
            }
            PipelineEvent::FileFailed { stage, path, error } => {
                warn!(%stage, path = %path.display(), %error, "File skipped");
            }
            PipelineEvent::Cancelled { stage } => {
                warn!(%stage, "Cancelled, partial progress kept");
            }
            PipelineEvent::StageCompleted { stage, stats } => {
                info!(
                    %stage,
                    succeeded = stats.succeeded,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    "Stage completed"
                );
            }
        }
    }
}
