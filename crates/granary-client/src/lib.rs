//! Granary Client - HTTP access to CKAN open data catalogs
//!
//! This crate provides the [`CatalogClient`](granary_core::CatalogClient)
//! implementation used by the download stage:
//!
//! - [`ckan`] - CKAN action API and resource payload streaming
//!
//! # Overview
//!
//! Every request goes through one shared `reqwest::Client` built by
//! [`build_session`]. The client never retries: a failed package or resource
//! is counted by the download stage and picked up again on the next run.

pub mod ckan;

// Re-export main client types
pub use ckan::{CkanClient, build_session};
