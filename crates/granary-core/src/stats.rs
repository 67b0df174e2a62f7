//! Per-stage outcome accounting.
//!
//! Every stage reports how many units (packages, resources, files) succeeded,
//! were skipped, or failed. Failures never abort a stage, so these counters are
//! the user-visible result of a run.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of processing a single unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The unit was processed and its artifact is now in place.
    Succeeded,
    /// Nothing to do: the artifact already exists or the unit is out of scope.
    Skipped,
    /// Processing failed; re-running the stage retries the unit.
    Failed,
}

/// Statistics for one stage of the pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageStats {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Succeeded => self.succeeded += 1,
            StageOutcome::Skipped => self.skipped += 1,
            StageOutcome::Failed => self.failed += 1,
        }
    }

    /// Returns the total number of processed units.
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    /// Returns true if no unit failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Lock-free counterpart of [`StageStats`] shared by concurrent workers.
#[derive(Debug, Default)]
pub struct AtomicStageStats {
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl AtomicStageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: StageOutcome) {
        let counter = match outcome {
            StageOutcome::Succeeded => &self.succeeded,
            StageOutcome::Skipped => &self.skipped,
            StageOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot for reporting.
    pub fn to_stats(&self) -> StageStats {
        StageStats {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Result of a download run.
///
/// Package-level failures are metadata failures; resource-level counters cover
/// payload downloads only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub packages: StageStats,
    pub resources: StageStats,
    /// Failed packages and resources whose error is transient.
    pub retryable: usize,
    /// True if the run stopped early because it was cancelled.
    pub cancelled: bool,
}
