//! Granary Core - Domain types, stage services and schema inference.
//!
//! This crate provides the core functionality for Granary, including:
//!
//! - **Domain models**: [`Package`], [`Resource`] and the on-disk [`StorageLayout`]
//! - **Services**: [`DownloadService`] mirrors a catalog to disk,
//!   [`RepairService`] strips invalid UTF-8 in place, [`IngestService`] loads
//!   CSV files into one table per resource
//! - **Schema inference**: identifier sanitization, delimiter sniffing and
//!   column typing in [`schema`]
//! - **Traits**: [`CatalogClient`], [`TableStore`] for dependency injection
//! - **Progress reporting**: [`ProgressReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! Every stage is re-runnable: its completion is read back from the
//! filesystem or the store, never from in-memory state. Failures are counted
//! per unit of work (package, resource, file) and never abort a stage.
//!
//! - [`CatalogClient`] - abstracts catalog access (e.g., CKAN API)
//! - [`TableStore`] - abstracts table creation and bulk loading (e.g., PostgreSQL)
//!
//! # Example
//!
//! ```ignore
//! use granary_core::{DownloadConfig, DownloadService, IngestConfig, IngestService};
//! use granary_core::{RepairConfig, RepairService};
//!
//! let report = DownloadService::new(client, DownloadConfig::default())
//!     .run(output, 8)
//!     .await?;
//! RepairService::new(RepairConfig::default()).repair_dir(output).await?;
//! IngestService::new(store, IngestConfig::default()).ingest_dir(output).await?;
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod ingest;
pub mod layout;
pub mod models;
pub mod progress;
pub mod repair;
pub mod schema;
pub mod stats;
pub mod traits;

// Configuration
pub use config::{
    CatalogEntry, DbConfig, DownloadConfig, HarvestConfig, HttpConfig, IngestConfig, RepairConfig,
    RepairPolicy, StoreConfig, default_config_path, load_harvest_config,
};

// Error handling
pub use error::AppError;

// Domain models
pub use layout::StorageLayout;
pub use models::{Package, Resource};

// Schema
pub use schema::{CellValue, Column, ColumnType, TableSchema};

// Stage statistics
pub use stats::{AtomicStageStats, DownloadReport, StageOutcome, StageStats};

// Progress reporting
pub use progress::{PipelineEvent, ProgressReporter, SilentReporter, Stage, TracingReporter};

// Traits for dependency injection
pub use traits::{ByteStream, CatalogClient, TableLoad, TableStore};

// Services (generic over trait implementations)
pub use download::DownloadService;
pub use ingest::{IngestOutcome, IngestService, SkipReason};
pub use repair::{RepairOutcome, RepairService};
