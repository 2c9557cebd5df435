//! Core trait for the cell elevation store.
//!
//! The `CellStore` trait is the persistence seam of the crate: everything
//! above it (aggregation, population, resolution) talks to elevations
//! through this interface, and the production deployment backs it with a
//! graph database while tests and the CLI use [`MemoryCellStore`].
//!
//! # Design Principles
//!
//! - **Append-only values**: an elevation, once written, never changes.
//!   `put` treats a byte-identical rewrite as a no-op and a differing
//!   rewrite as a [`StoreError::Conflict`].
//! - **Absence is not an error**: `get` returns `None` and `get_many`
//!   simply omits absent keys.
//! - **Edges are a memo, not truth**: the parent/child hierarchy is always
//!   re-derivable from the cell index; `cache_children` only persists the
//!   enumeration so aggregation does not recompute it.
//! - **Dyn-compatible**: async methods return `Pin<Box<dyn Future>>` so the
//!   store can be held as `Arc<dyn CellStore>`.
//!
//! [`MemoryCellStore`]: crate::store::MemoryCellStore

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use h3o::CellIndex;
use thiserror::Error;

use crate::cell::{CellStatus, ElevationSource};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A differing elevation already exists for the cell.
    ///
    /// Elevations are physical facts and derived averages are deterministic,
    /// so a differing re-derivation indicates a logic bug upstream. The
    /// stored value wins.
    #[error("cell {cell} already has elevation {existing}, rejecting differing write of {attempted}")]
    Conflict {
        cell: CellIndex,
        existing: f64,
        attempted: f64,
    },

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistent mapping from cell index to elevation, plus extraction status
/// and a memo table of parent/child edges.
///
/// # Durability
///
/// Writes must be durable before `put` returns; callers assume there is no
/// buffering across process restarts.
///
/// # Concurrency
///
/// Implementations must tolerate concurrent reads and writes from many
/// resolver instances. No locking is required beyond what the backend
/// provides: writes are rare relative to reads, and value conflicts are
/// exceptional by construction.
pub trait CellStore: Send + Sync {
    /// Retrieve the elevation for a cell, if one has been stored.
    fn get(&self, cell: CellIndex) -> BoxFuture<'_, Result<Option<f64>, StoreError>>;

    /// Retrieve elevations for many cells at once.
    ///
    /// Returns only the entries that exist; absent cells are omitted from
    /// the map rather than reported as errors.
    fn get_many(
        &self,
        cells: &[CellIndex],
    ) -> BoxFuture<'_, Result<HashMap<CellIndex, f64>, StoreError>>;

    /// Store an elevation for a cell.
    ///
    /// Succeeds silently if the identical value is already present, so
    /// concurrent writers racing on the same derivation are benign.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if a differing elevation exists.
    fn put(
        &self,
        cell: CellIndex,
        elevation: f64,
        source: ElevationSource,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Extraction status of a cell; `Unextracted` for unknown cells.
    fn status(&self, cell: CellIndex) -> BoxFuture<'_, Result<CellStatus, StoreError>>;

    /// Record a status transition for a cell.
    fn mark_status(
        &self,
        cell: CellIndex,
        status: CellStatus,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Previously memoized direct children of a cell, if any.
    fn cached_children(
        &self,
        cell: CellIndex,
    ) -> BoxFuture<'_, Result<Option<Vec<CellIndex>>, StoreError>>;

    /// Memoize the direct children of a cell for later traversals.
    fn cache_children(
        &self,
        cell: CellIndex,
        children: &[CellIndex],
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}
