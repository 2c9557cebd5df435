//! Parent-from-children elevation aggregation.
//!
//! An elevation for a cell coarser than the base extraction resolution is
//! the unweighted arithmetic mean of its direct children, computed
//! bottom-up. The [`Aggregator`] walks that hierarchy on demand: stored
//! values short-circuit the walk, derived values are written back through
//! the store so the next request finds them directly.
//!
//! Aggregation is all-or-nothing: a parent is only derivable once every
//! direct child resolves. Pentagon cells and cells at the geographic edge
//! of the dataset may never reach full coverage; they stay unresolved until
//! the source data improves, which the caller reports as `later`. Partial
//! averaging would silently under-represent terrain variation and is
//! deliberately not offered.
//!
//! The aggregator memoizes per instance. Create one per request batch and
//! drop it with the request; no memo state survives a request.

use std::collections::HashMap;

use h3o::{CellIndex, Resolution};
use tracing::{debug, warn};

use crate::cell;
use crate::cell::ElevationSource;
use crate::store::{BoxFuture, CellStore, StoreError};

/// Resolves cell elevations by recursive child averaging.
pub struct Aggregator<'a> {
    store: &'a dyn CellStore,
    memo: HashMap<CellIndex, Option<f64>>,
}

impl<'a> Aggregator<'a> {
    /// Create an aggregator scoped to one request batch.
    pub fn new(store: &'a dyn CellStore) -> Self {
        Self {
            store,
            memo: HashMap::new(),
        }
    }

    /// Produce an elevation for a cell, deriving it from descendants when
    /// it is not directly stored.
    ///
    /// Returns `None` when the cell cannot be resolved: a base-resolution
    /// leaf with no stored value, or a parent with at least one unresolved
    /// child. Such cells must be escalated to population.
    pub async fn resolve(&mut self, cell: CellIndex) -> Result<Option<f64>, StoreError> {
        self.resolve_boxed(cell).await
    }

    fn resolve_boxed(&mut self, cell: CellIndex) -> BoxFuture<'_, Result<Option<f64>, StoreError>> {
        Box::pin(async move {
            if let Some(hit) = self.memo.get(&cell) {
                return Ok(*hit);
            }

            if let Some(value) = self.store.get(cell).await? {
                self.memo.insert(cell, Some(value));
                return Ok(Some(value));
            }

            let Some(finer) = cell::child_resolution(cell.resolution()) else {
                // Leaf at the base extraction resolution: nothing to
                // aggregate from, only population can fill it.
                self.memo.insert(cell, None);
                return Ok(None);
            };

            let children = self.children_of(cell, finer).await?;
            let mut sum = 0.0;
            let mut known = 0usize;
            for &child in &children {
                if let Some(value) = self.resolve_boxed(child).await? {
                    sum += value;
                    known += 1;
                }
            }

            if known < children.len() {
                debug!(
                    %cell,
                    known,
                    total = children.len(),
                    "incomplete child coverage, cell stays unresolved"
                );
                self.memo.insert(cell, None);
                return Ok(None);
            }

            let mean = sum / children.len() as f64;
            let value = match self.store.put(cell, mean, ElevationSource::Derived).await {
                Ok(()) => mean,
                Err(StoreError::Conflict { existing, .. }) => {
                    warn!(
                        %cell,
                        existing,
                        derived = mean,
                        "derived elevation conflicts with stored value, keeping stored"
                    );
                    existing
                }
                Err(err) => return Err(err),
            };

            self.memo.insert(cell, Some(value));
            Ok(Some(value))
        })
    }

    /// Direct children of a cell, from the store's memo table when present.
    async fn children_of(
        &self,
        cell: CellIndex,
        finer: Resolution,
    ) -> Result<Vec<CellIndex>, StoreError> {
        if let Some(cached) = self.store.cached_children(cell).await? {
            return Ok(cached);
        }
        let children: Vec<CellIndex> = cell.children(finer).collect();
        self.store.cache_children(cell, &children).await?;
        Ok(children)
    }
}
