//! Test utilities and mock implementations for integration tests.
//!
//! Provides mock implementations of the core traits for testing
//! `DownloadService` and `IngestService` in isolation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use granary_core::schema::CellValue;
use granary_core::traits::{ByteStream, CatalogClient, TableLoad, TableStore};
use granary_core::{AppError, Package, Resource, TableSchema};

// =============================================================================
// MockCatalogClient
// =============================================================================

/// In-memory catalog with configurable packages, payloads and failures.
#[derive(Clone, Default)]
pub struct MockCatalogClient {
    packages: Vec<Package>,
    groups: HashMap<String, Vec<String>>,
    payloads: HashMap<String, Vec<u8>>,
    /// Package ids whose details request fails.
    failing_packages: HashSet<String>,
    /// Resource ids whose download fails. Shared so tests can heal the
    /// catalog between runs.
    pub failing_resources: Arc<Mutex<HashSet<String>>>,
    /// Resource ids whose stream breaks after the first chunk.
    truncated_resources: HashSet<String>,
    /// Number of `download_resource` calls made so far.
    pub download_calls: Arc<AtomicUsize>,
    /// Delay before each download responds.
    latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockCatalogClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a package whose resources are `(resource id, format, payload)`.
    pub fn with_package(mut self, id: &str, resources: &[(&str, &str, &[u8])]) -> Self {
        let resources = resources
            .iter()
            .map(|(resource_id, format, payload)| {
                self.payloads
                    .insert(resource_id.to_string(), payload.to_vec());
                Resource {
                    id: resource_id.to_string(),
                    package_id: id.to_string(),
                    url: format!("https://catalog.example.com/download/{}", resource_id),
                    name: None,
                    format: Some(format.to_string()),
                    mimetype: None,
                }
            })
            .collect();
        self.packages.push(Package {
            id: id.to_string(),
            resources,
            metadata: serde_json::json!({ "id": id, "name": id }),
        });
        self
    }

    pub fn with_failing_package(mut self, id: &str) -> Self {
        self.failing_packages.insert(id.to_string());
        self
    }

    pub fn with_failing_resource(self, id: &str) -> Self {
        self.failing_resources
            .lock()
            .unwrap()
            .insert(id.to_string());
        self
    }

    pub fn with_truncated_resource(mut self, id: &str) -> Self {
        self.truncated_resources.insert(id.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Highest number of downloads that were waiting at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn with_group(mut self, group: &str, package_ids: &[&str]) -> Self {
        self.groups.insert(
            group.to_string(),
            package_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

impl CatalogClient for MockCatalogClient {
    fn list_packages(&self) -> BoxStream<'_, Result<String, AppError>> {
        stream::iter(self.packages.iter().map(|p| Ok(p.id.clone()))).boxed()
    }

    async fn list_group_packages(&self, group: &str) -> Result<Vec<String>, AppError> {
        self.groups
            .get(group)
            .cloned()
            .ok_or_else(|| AppError::CatalogError(format!("Group not found: {}", group)))
    }

    async fn get_package_details(&self, id: &str) -> Result<Package, AppError> {
        if self.failing_packages.contains(id) {
            return Err(AppError::CatalogError(format!(
                "package_show {}: success: false",
                id
            )));
        }
        self.packages
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::CatalogError(format!("Package not found: {}", id)))
    }

    async fn download_resource(&self, resource: &Resource) -> Result<ByteStream, AppError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.failing_resources.lock().unwrap().contains(&resource.id) {
            return Err(AppError::DownloadError(format!(
                "HTTP 503 for {}",
                resource.url
            )));
        }
        let payload = self.payloads.get(&resource.id).cloned().unwrap_or_default();
        // Serve in small chunks to exercise sequential writes.
        let mut chunks: Vec<Result<Bytes, AppError>> = payload
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.truncated_resources.contains(&resource.id) {
            chunks.truncate(1);
            chunks.push(Err(AppError::DownloadError(format!(
                "connection reset while reading {}",
                resource.url
            ))));
        }
        Ok(stream::iter(chunks).boxed())
    }
}

// =============================================================================
// MockTableStore
// =============================================================================

/// A committed table.
#[derive(Clone, Debug)]
pub struct StoredTable {
    pub schema: TableSchema,
    pub rows: Vec<Vec<CellValue>>,
}

/// In-memory table store.
///
/// Tables become visible only on commit, mirroring the transactional
/// behavior of the PostgreSQL store.
#[derive(Clone, Default)]
pub struct MockTableStore {
    tables: Arc<Mutex<HashMap<String, StoredTable>>>,
    /// Table names whose load fails mid-way.
    failing_tables: Arc<Mutex<HashSet<String>>>,
    /// Number of `begin` calls made so far.
    pub loads_started: Arc<AtomicUsize>,
}

impl MockTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn fail_table(&self, table: &str) {
        self.failing_tables
            .lock()
            .unwrap()
            .insert(table.to_string());
    }

    pub fn table(&self, name: &str) -> Option<StoredTable> {
        self.tables.lock().unwrap().get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct MockLoad {
    tables: Arc<Mutex<HashMap<String, StoredTable>>>,
    schema: TableSchema,
    rows: Vec<Vec<CellValue>>,
    fail: bool,
}

impl TableLoad for MockLoad {
    async fn insert_rows(&mut self, rows: &[Vec<CellValue>]) -> Result<u64, AppError> {
        if self.fail {
            return Err(AppError::Generic("simulated bulk load failure".to_string()));
        }
        for row in rows {
            if row.len() != self.schema.columns.len() {
                return Err(AppError::Generic(format!(
                    "row has {} cells, table has {} columns",
                    row.len(),
                    self.schema.columns.len()
                )));
            }
        }
        self.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tables.lock().unwrap().insert(
            self.schema.table.clone(),
            StoredTable {
                schema: self.schema,
                rows: self.rows,
            },
        );
        Ok(())
    }
}

impl TableStore for MockTableStore {
    type Load = MockLoad;

    async fn begin(&self, schema: &TableSchema) -> Result<MockLoad, AppError> {
        self.loads_started.fetch_add(1, Ordering::SeqCst);
        Ok(MockLoad {
            tables: Arc::clone(&self.tables),
            schema: schema.clone(),
            rows: Vec::new(),
            fail: self.failing_tables.lock().unwrap().contains(&schema.table),
        })
    }

    async fn row_count(&self, table: &str) -> Result<Option<u64>, AppError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.len() as u64))
    }
}
