//! Granary DB - PostgreSQL table store
//!
//! This crate provides the [`TableStore`](granary_core::TableStore)
//! implementation used by the ingest stage.
//!
//! # Overview
//!
//! The main components are:
//! - [`TableRepository`] - one table per resource, replaced in a single transaction
//! - [`connect_pool`] - connection pool built from the store settings

mod table_repository;

pub use table_repository::{PgLoad, TableRepository, connect_pool, quote_identifier};
