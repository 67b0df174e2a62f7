//! Trait definitions for external dependencies.
//!
//! The stage services are generic over these traits so the same pipeline runs
//! against the real CKAN client and PostgreSQL store in production and against
//! in-memory mocks in tests.
//!
//! # Example
//!
//! ```
//! use futures::StreamExt;
//! use granary_core::traits::CatalogClient;
//! use granary_core::AppError;
//!
//! // Business logic uses traits, not concrete types
//! async fn count_resources<C: CatalogClient>(client: &C) -> Result<usize, AppError> {
//!     let mut ids = client.list_packages();
//!     let mut total = 0;
//!     while let Some(id) = ids.next().await {
//!         total += client.get_package_details(&id?).await?.resources.len();
//!     }
//!     Ok(total)
//! }
//! ```

use std::future::Future;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::models::{Package, Resource};
use crate::schema::{CellValue, TableSchema};
use crate::AppError;

/// Byte stream of one resource payload.
pub type ByteStream = BoxStream<'static, Result<Bytes, AppError>>;

/// Client for a CKAN-style catalog API.
///
/// Implementations perform no retries; a failed call is reported to the
/// caller, which records it and moves on.
pub trait CatalogClient: Send + Sync + Clone {
    /// Lists every package identifier in the catalog.
    ///
    /// The stream is lazy and finite. Each call starts a fresh pass from the
    /// beginning of the catalog.
    fn list_packages(&self) -> BoxStream<'_, Result<String, AppError>>;

    /// Lists the package identifiers of one catalog group.
    fn list_group_packages(
        &self,
        group: &str,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Fetches a package with its resource list and raw metadata.
    ///
    /// # Errors
    ///
    /// `AppError::CatalogError` on HTTP or parse failures, on a
    /// `success: false` response, or on malformed resource entries.
    fn get_package_details(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Package, AppError>> + Send;

    /// Opens a streamed read of a resource payload.
    ///
    /// # Errors
    ///
    /// `AppError::DownloadError` when the server answers with a non-success
    /// status. The check happens before any byte is yielded.
    fn download_resource(
        &self,
        resource: &Resource,
    ) -> impl Future<Output = Result<ByteStream, AppError>> + Send;
}

/// Relational store receiving one table per ingested resource.
pub trait TableStore: Send + Sync + Clone {
    /// In-progress load of a single table.
    type Load: TableLoad;

    /// Opens a transaction, drops any existing table with the schema's name
    /// and creates it afresh.
    fn begin(
        &self,
        schema: &TableSchema,
    ) -> impl Future<Output = Result<Self::Load, AppError>> + Send;

    /// Returns the number of rows in `table`, or `None` if it does not exist.
    fn row_count(&self, table: &str)
    -> impl Future<Output = Result<Option<u64>, AppError>> + Send;
}

/// A table being loaded inside a transaction.
///
/// Dropping a load without calling [`commit`](TableLoad::commit) rolls back
/// both the table creation and every inserted row.
pub trait TableLoad: Send {
    /// Appends rows. Every row has exactly one cell per schema column.
    fn insert_rows(
        &mut self,
        rows: &[Vec<CellValue>],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Makes the table and its rows visible.
    fn commit(self) -> impl Future<Output = Result<(), AppError>> + Send;
}
