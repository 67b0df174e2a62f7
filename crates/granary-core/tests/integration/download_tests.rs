//! Integration tests for DownloadService.
//!
//! These tests verify resumability, atomicity and per-package failure
//! isolation against an in-memory catalog and a temporary directory.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use granary_core::layout::partial_path;
use granary_core::{DownloadConfig, DownloadService};
use walkdir::WalkDir;

use crate::integration::common::MockCatalogClient;

/// Relative paths of every file under `root`.
fn file_set(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

fn three_packages() -> MockCatalogClient {
    MockCatalogClient::new()
        .with_package(
            "bilancio-2023",
            &[
                ("res-a", "CSV", b"anno;importo\n2023;10\n"),
                ("res-b", "JSON", b"{\"ok\": true}"),
            ],
        )
        .with_package("spese-personale", &[("res-c", "CSV", b"ente;spesa\nroma;1\n")])
        .with_package("broken", &[("res-d", "CSV", b"never fetched")])
}

/// A package whose metadata fails is counted once and does not stop the
/// resources of the other packages.
#[tokio::test]
async fn test_failing_package_is_isolated() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let client = three_packages().with_failing_package("broken");
    let service = DownloadService::new(client, DownloadConfig::default());

    // Act
    let report = service.run(dir.path(), 4).await.unwrap();

    // Assert
    assert_eq!(report.packages.failed, 1, "Exactly one package-level failure");
    assert_eq!(report.packages.succeeded, 2);
    assert_eq!(report.resources.succeeded, 3);
    assert_eq!(report.resources.failed, 0);

    let files = file_set(dir.path());
    assert!(files.contains("bilancio-2023/res-a.csv"));
    assert!(files.contains("bilancio-2023/res-b.json"));
    assert!(files.contains("spese-personale/res-c.csv"));
    assert!(!files.iter().any(|f| f.starts_with("broken")));
}

/// Running twice downloads nothing the second time and leaves the same files.
#[tokio::test]
async fn test_second_run_is_a_no_op() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let client = three_packages();
    let service = DownloadService::new(client.clone(), DownloadConfig::default());

    // Act
    let first = service.run(dir.path(), 2).await.unwrap();
    let files_after_first = file_set(dir.path());
    let calls_after_first = client.downloads();
    let second = service.run(dir.path(), 2).await.unwrap();

    // Assert
    assert_eq!(first.resources.succeeded, 4);
    assert_eq!(second.resources.succeeded, 0);
    assert_eq!(second.resources.skipped, 4);
    assert_eq!(second.packages.skipped, 3, "Metadata already present");
    assert_eq!(client.downloads(), calls_after_first, "No new downloads");
    assert_eq!(file_set(dir.path()), files_after_first);
}

/// A failed resource leaves no file behind and is the only one retried.
#[tokio::test]
async fn test_failed_resource_is_retried_next_run() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let client = three_packages().with_failing_resource("res-c");
    let service = DownloadService::new(client.clone(), DownloadConfig::default());
    let target = dir.path().join("spese-personale").join("res-c.csv");

    // Act
    let first = service.run(dir.path(), 3).await.unwrap();

    // Assert: nothing at the final path, no partial left over
    assert_eq!(first.resources.failed, 1);
    assert!(!target.exists());
    assert!(!partial_path(&target).exists());

    // Act: the catalog recovers
    client.failing_resources.lock().unwrap().clear();
    let calls_before = client.downloads();
    let second = service.run(dir.path(), 3).await.unwrap();

    // Assert
    assert_eq!(second.resources.succeeded, 1);
    assert_eq!(second.resources.skipped, 3);
    assert_eq!(client.downloads() - calls_before, 1);
    assert_eq!(std::fs::read(&target).unwrap(), b"ente;spesa\nroma;1\n");
}

/// A stale partial file from an interrupted run never counts as done.
#[tokio::test]
async fn test_stale_partial_file_is_replaced() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("bilancio-2023").join("res-a.csv");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(partial_path(&target), b"anno;imp").unwrap();
    let service = DownloadService::new(three_packages(), DownloadConfig::default());

    // Act
    service.run(dir.path(), 1).await.unwrap();

    // Assert
    assert_eq!(std::fs::read(&target).unwrap(), b"anno;importo\n2023;10\n");
    assert!(!partial_path(&target).exists());
}

/// An empty file at the final path is not a finished download.
#[tokio::test]
async fn test_empty_final_file_is_downloaded_again() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("spese-personale").join("res-c.csv");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, b"").unwrap();
    let service = DownloadService::new(three_packages(), DownloadConfig::default());

    // Act
    let report = service.run(dir.path(), 2).await.unwrap();

    // Assert
    assert_eq!(report.resources.succeeded, 4);
    assert_eq!(std::fs::read(&target).unwrap(), b"ente;spesa\nroma;1\n");
}

/// Group harvests only touch the packages of the configured groups.
#[tokio::test]
async fn test_group_harvest() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let client = three_packages()
        .with_group("bilanci", &["bilancio-2023"])
        .with_group("personale", &["spese-personale", "bilancio-2023"]);
    let config = DownloadConfig::default().with_groups(vec![
        "bilanci".to_string(),
        "personale".to_string(),
    ]);
    let service = DownloadService::new(client, config);

    // Act
    let report = service.run(dir.path(), 2).await.unwrap();

    // Assert: bilancio-2023 is listed twice but fetched once
    assert_eq!(report.packages.total(), 2);
    assert_eq!(report.resources.succeeded, 3);
    assert!(!dir.path().join("broken").exists());
}

/// With a format filter, other resources are not fetched.
#[tokio::test]
async fn test_format_filter_restricts_downloads() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let client = three_packages();
    let config = DownloadConfig::default().with_formats(vec!["csv".to_string()]);
    let service = DownloadService::new(client.clone(), config);

    // Act
    let report = service.run(dir.path(), 2).await.unwrap();

    // Assert
    assert_eq!(report.resources.succeeded, 3);
    assert!(!dir.path().join("bilancio-2023").join("res-b.json").exists());
    assert_eq!(client.downloads(), 3);
}

/// No more downloads are in flight at once than the configured bound.
#[tokio::test]
async fn test_in_flight_downloads_are_bounded() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let resources: Vec<(String, &[u8])> = (0..12)
        .map(|i| (format!("res-{:02}", i), b"id;valore\n1;2\n".as_slice()))
        .collect();
    let listing: Vec<(&str, &str, &[u8])> = resources
        .iter()
        .map(|(id, payload)| (id.as_str(), "CSV", *payload))
        .collect();
    let client = MockCatalogClient::new()
        .with_package("rendiconto", &listing)
        .with_latency(Duration::from_millis(30));
    let service = DownloadService::new(client.clone(), DownloadConfig::default());

    // Act
    let report = service.run(dir.path(), 3).await.unwrap();

    // Assert
    assert_eq!(report.resources.succeeded, 12);
    assert!(client.peak_in_flight() <= 3, "peak was {}", client.peak_in_flight());
    assert!(client.peak_in_flight() > 1, "downloads never overlapped");
}

/// A stream that breaks after some bytes were written leaves neither the
/// final file nor its partial sibling.
#[tokio::test]
async fn test_stream_broken_midway_leaves_nothing() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let client = three_packages().with_truncated_resource("res-a");
    let service = DownloadService::new(client, DownloadConfig::default());
    let target = dir.path().join("bilancio-2023").join("res-a.csv");

    // Act
    let report = service.run(dir.path(), 2).await.unwrap();

    // Assert
    assert_eq!(report.resources.failed, 1);
    assert_eq!(report.resources.succeeded, 3);
    assert_eq!(report.retryable, 1);
    assert!(!target.exists());
    assert!(!partial_path(&target).exists());
    assert!(dir.path().join("bilancio-2023").join("res-b.json").exists());
}
