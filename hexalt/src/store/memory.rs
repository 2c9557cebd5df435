//! In-memory cell store backed by dashmap.
//!
//! Used by tests and the CLI, and as the reference implementation of the
//! [`CellStore`] contract the production graph store must satisfy. The
//! sharded maps give lock-free reads in the common case and entry-level
//! locking on writes, which is all the conflict check needs.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use h3o::CellIndex;

use crate::cell::{CellStatus, ElevationSource};
use crate::store::traits::{BoxFuture, CellStore, StoreError};

#[derive(Clone, Copy, Debug)]
struct StoredElevation {
    value: f64,
    source: ElevationSource,
}

/// Concurrent in-memory implementation of [`CellStore`].
#[derive(Debug, Default)]
pub struct MemoryCellStore {
    elevations: DashMap<CellIndex, StoredElevation>,
    statuses: DashMap<CellIndex, CellStatus>,
    children: DashMap<CellIndex, Vec<CellIndex>>,
}

impl MemoryCellStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored elevations.
    pub fn len(&self) -> usize {
        self.elevations.len()
    }

    /// Returns true if no elevations have been stored.
    pub fn is_empty(&self) -> bool {
        self.elevations.is_empty()
    }

    /// Provenance of a stored elevation, if present.
    pub fn source(&self, cell: CellIndex) -> Option<ElevationSource> {
        self.elevations.get(&cell).map(|entry| entry.source)
    }
}

impl CellStore for MemoryCellStore {
    fn get(&self, cell: CellIndex) -> BoxFuture<'_, Result<Option<f64>, StoreError>> {
        Box::pin(async move { Ok(self.elevations.get(&cell).map(|entry| entry.value)) })
    }

    fn get_many(
        &self,
        cells: &[CellIndex],
    ) -> BoxFuture<'_, Result<HashMap<CellIndex, f64>, StoreError>> {
        let cells = cells.to_vec();
        Box::pin(async move {
            let mut found = HashMap::with_capacity(cells.len());
            for cell in cells {
                if let Some(entry) = self.elevations.get(&cell) {
                    found.insert(cell, entry.value);
                }
            }
            Ok(found)
        })
    }

    fn put(
        &self,
        cell: CellIndex,
        elevation: f64,
        source: ElevationSource,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            match self.elevations.entry(cell) {
                Entry::Occupied(entry) => {
                    let existing = entry.get().value;
                    // Byte-exact comparison: derived averages are
                    // deterministic, so any difference is a conflict.
                    if existing.to_bits() == elevation.to_bits() {
                        Ok(())
                    } else {
                        Err(StoreError::Conflict {
                            cell,
                            existing,
                            attempted: elevation,
                        })
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(StoredElevation {
                        value: elevation,
                        source,
                    });
                    Ok(())
                }
            }
        })
    }

    fn status(&self, cell: CellIndex) -> BoxFuture<'_, Result<CellStatus, StoreError>> {
        Box::pin(async move {
            Ok(self
                .statuses
                .get(&cell)
                .map(|entry| *entry)
                .unwrap_or_default())
        })
    }

    fn mark_status(
        &self,
        cell: CellIndex,
        status: CellStatus,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.statuses.insert(cell, status);
            Ok(())
        })
    }

    fn cached_children(
        &self,
        cell: CellIndex,
    ) -> BoxFuture<'_, Result<Option<Vec<CellIndex>>, StoreError>> {
        Box::pin(async move { Ok(self.children.get(&cell).map(|entry| entry.value().clone())) })
    }

    fn cache_children(
        &self,
        cell: CellIndex,
        children: &[CellIndex],
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let children = children.to_vec();
        Box::pin(async move {
            self.children.insert(cell, children);
            Ok(())
        })
    }
}
