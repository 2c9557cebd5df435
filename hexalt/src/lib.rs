//! Hexalt - lazily populated elevations for H3 cells
//!
//! Hexalt answers elevation queries for hexagonal grid cells, raw
//! latitude/longitude points and polygons. The backing dataset is far too
//! large to preload, so elevations are materialized on first request: a
//! query touching unknown cells triggers asynchronous population and comes
//! back with those cells flagged `later` plus a wait estimate. Re-submitting
//! the identical query returns progressively more results as extraction
//! completes.
//!
//! Elevations exist at one measured resolution; every coarser resolution is
//! the mean of its child cells, derived on demand and cached. See the
//! [`aggregate`] module for the coverage policy.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hexalt::populate::ChannelPipeline;
//! use hexalt::query::ElevationQuery;
//! use hexalt::service::{ElevationService, ServiceConfig};
//! use hexalt::store::MemoryCellStore;
//!
//! let store = Arc::new(MemoryCellStore::new());
//! let (pipeline, batches) = ChannelPipeline::new(64);
//! let service = ElevationService::new(store, Arc::new(pipeline), ServiceConfig::default());
//!
//! let query: ElevationQuery = serde_json::from_str(r#"{"h3_cells": [631053048207246335]}"#)?;
//! let response = service.handle(&query).await?;
//! ```

pub mod aggregate;
pub mod cell;
pub mod populate;
pub mod query;
pub mod resolver;
pub mod service;
pub mod store;

/// Version of the Hexalt library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
