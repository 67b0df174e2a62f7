//! Download service: mirrors catalog resources to local storage.
//!
//! # Resumability
//!
//! The filesystem is the only record of progress. A resource whose final path
//! exists and is non-empty is never fetched again; every payload is streamed
//! to a `.partial` sibling and renamed into place only once it is complete, so
//! an interrupted or failed download leaves nothing at the final path and the
//! next run retries exactly the resources that are missing.
//!
//! # Concurrency
//!
//! Package details and payloads are fetched through
//! `futures::StreamExt::buffer_unordered`, bounded by `max_concurrency`
//! in-flight requests. Completion order is not guaranteed.
//!
//! # Cancellation
//!
//! A [`CancellationToken`] stops new work from starting. Downloads already in
//! flight run to completion (or fail) without touching other final paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::stream::{self, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::{DownloadConfig, validate_max_concurrency};
use crate::layout::{StorageLayout, is_complete, partial_path, write_atomic};
use crate::models::{Package, Resource};
use crate::progress::{PipelineEvent, ProgressReporter, SilentReporter, Stage};
use crate::stats::{AtomicStageStats, DownloadReport, StageOutcome};
use crate::traits::CatalogClient;
use crate::AppError;

/// Service that drives a [`CatalogClient`] into local storage.
pub struct DownloadService<C: CatalogClient> {
    client: C,
    config: DownloadConfig,
}

impl<C: CatalogClient> DownloadService<C> {
    pub fn new(client: C, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    /// Downloads every resource of the catalog into `output_dir`.
    ///
    /// Per-package and per-resource failures are logged and counted in the
    /// returned report; they never abort the run.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` if `max_concurrency` is zero, an I/O error if
    /// `output_dir` cannot be created, or the catalog error that prevented the
    /// package list from being enumerated.
    pub async fn run(
        &self,
        output_dir: &Path,
        max_concurrency: usize,
    ) -> Result<DownloadReport, AppError> {
        self.run_with_progress(
            output_dir,
            max_concurrency,
            &SilentReporter,
            CancellationToken::new(),
        )
        .await
    }

    /// Same as [`run`](Self::run), with progress events and cancellation.
    pub async fn run_with_progress<R: ProgressReporter>(
        &self,
        output_dir: &Path,
        max_concurrency: usize,
        reporter: &R,
        cancel_token: CancellationToken,
    ) -> Result<DownloadReport, AppError> {
        validate_max_concurrency(max_concurrency)?;
        tokio::fs::create_dir_all(output_dir).await?;
        let layout = StorageLayout::new(output_dir);

        let package_ids = self.enumerate_packages().await?;
        reporter.report(PipelineEvent::PackagesFound {
            count: package_ids.len(),
        });

        let cancelled = AtomicBool::new(false);
        let retryable = AtomicUsize::new(0);
        let package_stats = AtomicStageStats::new();
        let packages = self
            .fetch_packages(
                package_ids,
                &layout,
                max_concurrency,
                &package_stats,
                reporter,
                &cancel_token,
                &cancelled,
                &retryable,
            )
            .await;

        let resources = self.select_resources(packages, &layout);
        reporter.report(PipelineEvent::ResourcesFound {
            count: resources.len(),
        });

        let resource_stats = AtomicStageStats::new();
        let client = &self.client;
        let stats = &resource_stats;
        let cancel = &cancel_token;
        let was_cancelled = &cancelled;
        let transient = &retryable;

        stream::iter(resources)
            .map(move |(resource, path)| async move {
                if cancel.is_cancelled() {
                    was_cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                if is_complete(&path).await {
                    stats.record(StageOutcome::Skipped);
                    return;
                }

                match download_to(client, &resource, &path).await {
                    Ok(bytes) => {
                        stats.record(StageOutcome::Succeeded);
                        reporter.report(PipelineEvent::ResourceDownloaded {
                            resource_id: &resource.id,
                            bytes,
                        });
                    }
                    Err(e) => {
                        let retryable = e.is_retryable();
                        tracing::warn!(
                            resource = resource.id.as_str(),
                            url = resource.url.as_str(),
                            error = %e,
                            retryable,
                            "Download failed"
                        );
                        stats.record(StageOutcome::Failed);
                        if retryable {
                            transient.fetch_add(1, Ordering::Relaxed);
                        }
                        reporter.report(PipelineEvent::ResourceFailed {
                            resource_id: &resource.id,
                            error: &e.to_string(),
                            retryable,
                        });
                    }
                }
            })
            .buffer_unordered(max_concurrency)
            .for_each(|_| async {})
            .await;

        let report = DownloadReport {
            packages: package_stats.to_stats(),
            resources: resource_stats.to_stats(),
            retryable: retryable.load(Ordering::Relaxed),
            cancelled: cancelled.load(Ordering::SeqCst),
        };
        if report.cancelled {
            reporter.report(PipelineEvent::Cancelled {
                stage: Stage::Download,
            });
        }
        reporter.report(PipelineEvent::StageCompleted {
            stage: Stage::Download,
            stats: &report.resources,
        });

        Ok(report)
    }

    /// Lists the packages to harvest, without duplicates, in catalog order.
    async fn enumerate_packages(&self) -> Result<Vec<String>, AppError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        if self.config.groups.is_empty() {
            let mut listing = self.client.list_packages();
            while let Some(id) = listing.next().await {
                let id = id?;
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        } else {
            for group in &self.config.groups {
                let members = self.client.list_group_packages(group).await?;
                tracing::debug!(group = group.as_str(), count = members.len(), "Group listed");
                for id in members {
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }
        }

        Ok(ids)
    }

    /// Fetches package details and writes each package's metadata document.
    ///
    /// Returns the packages whose resources should be considered.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_packages<R: ProgressReporter>(
        &self,
        package_ids: Vec<String>,
        layout: &StorageLayout,
        max_concurrency: usize,
        stats: &AtomicStageStats,
        reporter: &R,
        cancel: &CancellationToken,
        was_cancelled: &AtomicBool,
        transient: &AtomicUsize,
    ) -> Vec<Package> {
        let client = &self.client;

        stream::iter(package_ids)
            .map(move |id| async move {
                if cancel.is_cancelled() {
                    was_cancelled.store(true, Ordering::SeqCst);
                    return None;
                }

                let result = match client.get_package_details(&id).await {
                    Ok(package) => write_metadata(layout, &package)
                        .await
                        .map(|outcome| (package, outcome)),
                    Err(e) => Err(e),
                };

                match result {
                    Ok((package, outcome)) => {
                        stats.record(outcome);
                        Some(package)
                    }
                    Err(e) => {
                        stats.record(StageOutcome::Failed);
                        if e.is_retryable() {
                            transient.fetch_add(1, Ordering::Relaxed);
                        }
                        reporter.report(PipelineEvent::PackageFailed {
                            package_id: &id,
                            error: &e.to_string(),
                        });
                        None
                    }
                }
            })
            .buffer_unordered(max_concurrency)
            .filter_map(|package| async move { package })
            .collect()
            .await
    }

    /// Flattens packages into the resources to download, keyed by final path.
    fn select_resources(
        &self,
        packages: Vec<Package>,
        layout: &StorageLayout,
    ) -> Vec<(Resource, PathBuf)> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();

        for resource in packages.into_iter().flat_map(|p| p.resources) {
            if !resource.matches_formats(&self.config.formats) {
                tracing::debug!(
                    resource = resource.id.as_str(),
                    format = resource.format.as_deref().unwrap_or(""),
                    "Format filtered out"
                );
                continue;
            }
            let path = layout.resource_path(&resource);
            if !seen.insert(path.clone()) {
                tracing::warn!(
                    resource = resource.id.as_str(),
                    path = %path.display(),
                    "Duplicate resource path, keeping the first"
                );
                continue;
            }
            selected.push((resource, path));
        }

        selected
    }
}

async fn write_metadata(
    layout: &StorageLayout,
    package: &Package,
) -> Result<StageOutcome, AppError> {
    let path = layout.metadata_path(&package.id);
    if is_complete(&path).await {
        return Ok(StageOutcome::Skipped);
    }
    let body = serde_json::to_vec_pretty(&package.metadata)?;
    write_atomic(&path, &body).await?;
    Ok(StageOutcome::Succeeded)
}

/// Streams one resource to `<path>.partial`, then renames it to `path`.
///
/// On any failure the partial file is removed and `path` is left untouched.
async fn download_to<C: CatalogClient>(
    client: &C,
    resource: &Resource,
    path: &Path,
) -> Result<u64, AppError> {
    let partial = partial_path(path);

    let result = async {
        let mut body = client.download_resource(resource).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if written == 0 {
            return Err(AppError::DownloadError(format!(
                "empty payload from {}",
                resource.url
            )));
        }
        tokio::fs::rename(&partial, path).await?;
        Ok(written)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}
