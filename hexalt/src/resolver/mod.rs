//! Per-request cell resolution.
//!
//! [`ElevationResolver`] is the sole entry point for answering a batch of
//! target cells. Each cell either resolves now (stored or derivable) or is
//! deferred while its missing base-resolution descendants are handed to the
//! population pipeline in one batched request. The response is stateless:
//! there is no ticket, callers simply re-submit the identical request and
//! see more `ready` entries as background extraction completes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use h3o::CellIndex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregate::Aggregator;
use crate::cell;
use crate::cell::CellStatus;
use crate::populate::{DispatchError, PopulationRequester};
use crate::store::{CellStore, StoreError};

/// Errors from a batch resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A cell outside the served resolution window reached the resolver.
    ///
    /// Request validation rejects these first; this is the backstop.
    #[error("resolution {0} is outside the served range")]
    UnservedResolution(u8),

    /// The population pipeline rejected the batch; the caller should retry.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Classification of a requested batch.
///
/// Every requested cell appears in exactly one of `ready` or `later`.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Cells with an elevation, stored or derived during this request.
    pub ready: HashMap<CellIndex, f64>,
    /// Cells whose population has been (or already was) triggered.
    pub later: BTreeSet<CellIndex>,
    /// Completion estimate, present when this request dispatched population.
    pub estimated_wait: Option<Duration>,
}

/// Orchestrates store lookups, aggregation and population for one batch.
pub struct ElevationResolver {
    store: Arc<dyn CellStore>,
    requester: PopulationRequester,
}

impl ElevationResolver {
    pub fn new(store: Arc<dyn CellStore>, requester: PopulationRequester) -> Self {
        Self { store, requester }
    }

    /// Resolve a batch of cells at their encoded resolutions.
    ///
    /// Per cell: a direct store hit or a successful child aggregation puts
    /// it in `ready`; otherwise its unextracted leaf descendants join a
    /// batch-wide accumulator and the cell goes to `later`. The accumulator
    /// is dispatched once, after all cells are classified.
    ///
    /// A store failure on one cell defers that cell and continues with its
    /// siblings; only a dispatch failure fails the whole batch.
    pub async fn resolve_batch(
        &self,
        cells: &BTreeSet<CellIndex>,
    ) -> Result<BatchOutcome, ResolveError> {
        for &cell in cells {
            if !cell::is_served(cell.resolution()) {
                return Err(ResolveError::UnservedResolution(u8::from(cell.resolution())));
            }
        }

        let mut outcome = BatchOutcome::default();
        let mut to_populate = BTreeSet::new();

        // Batched fast path for cells stored at their exact resolution.
        let requested: Vec<CellIndex> = cells.iter().copied().collect();
        let direct_hits = match self.store.get_many(&requested).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "batched store lookup failed, falling back to per-cell");
                HashMap::new()
            }
        };

        let mut aggregator = Aggregator::new(self.store.as_ref());
        for &cell in cells {
            if let Some(&elevation) = direct_hits.get(&cell) {
                outcome.ready.insert(cell, elevation);
                continue;
            }

            match aggregator.resolve(cell).await {
                Ok(Some(elevation)) => {
                    outcome.ready.insert(cell, elevation);
                }
                Ok(None) => {
                    match self.unextracted_leaves(cell).await {
                        Ok(leaves) => to_populate.extend(leaves),
                        Err(err) => {
                            warn!(%cell, error = %err, "failed to enumerate leaf descendants");
                        }
                    }
                    outcome.later.insert(cell);
                }
                Err(err) => {
                    warn!(%cell, error = %err, "cell resolution failed, deferring");
                    outcome.later.insert(cell);
                }
            }
        }

        if !to_populate.is_empty() {
            debug!(
                later = outcome.later.len(),
                populate = to_populate.len(),
                "requesting population for missing leaves"
            );
            let wait = self.requester.request_population(&to_populate).await?;
            outcome.estimated_wait = Some(wait);
        }

        Ok(outcome)
    }

    /// Base-resolution descendants of a cell not yet touched by population.
    async fn unextracted_leaves(&self, cell: CellIndex) -> Result<Vec<CellIndex>, StoreError> {
        let mut leaves = Vec::new();
        for leaf in cell::leaf_descendants(cell) {
            if self.store.status(leaf).await? == CellStatus::Unextracted {
                leaves.push(leaf);
            }
        }
        Ok(leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ElevationSource;
    use crate::populate::{ExtractionPipeline, DEFAULT_ESTIMATED_WAIT};
    use crate::store::{BoxFuture, MemoryCellStore};
    use h3o::{LatLng, Resolution};
    use parking_lot::Mutex;

    /// Pipeline that records every dispatched batch.
    #[derive(Default)]
    struct RecordingPipeline {
        batches: Mutex<Vec<Vec<CellIndex>>>,
    }

    impl RecordingPipeline {
        fn batch_count(&self) -> usize {
            self.batches.lock().len()
        }

        fn dispatched(&self) -> Vec<CellIndex> {
            self.batches.lock().iter().flatten().copied().collect()
        }
    }

    impl ExtractionPipeline for RecordingPipeline {
        fn dispatch(&self, cells: Vec<CellIndex>) -> BoxFuture<'_, Result<(), DispatchError>> {
            Box::pin(async move {
                self.batches.lock().push(cells);
                Ok(())
            })
        }
    }

    fn resolver_with(
        store: Arc<MemoryCellStore>,
        pipeline: Arc<RecordingPipeline>,
    ) -> ElevationResolver {
        let requester = PopulationRequester::new(store.clone(), pipeline);
        ElevationResolver::new(store, requester)
    }

    fn cell_at(lat: f64, lng: f64, resolution: Resolution) -> CellIndex {
        LatLng::new(lat, lng)
            .expect("valid coordinates")
            .to_cell(resolution)
    }

    #[tokio::test]
    async fn test_stored_cells_are_ready_without_population() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let cell = cell_at(54.53097, 5.96836, Resolution::Twelve);
        store
            .put(cell, 32.1, ElevationSource::Measured)
            .await
            .unwrap();

        let resolver = resolver_with(store, pipeline.clone());
        let outcome = resolver
            .resolve_batch(&BTreeSet::from([cell]))
            .await
            .unwrap();

        assert_eq!(outcome.ready.get(&cell), Some(&32.1));
        assert!(outcome.later.is_empty());
        assert_eq!(outcome.estimated_wait, None);
        assert_eq!(pipeline.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_cell_is_deferred_and_populated() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let cell = cell_at(54.53097, 5.96836, Resolution::Twelve);

        let resolver = resolver_with(store, pipeline.clone());
        let outcome = resolver
            .resolve_batch(&BTreeSet::from([cell]))
            .await
            .unwrap();

        assert!(outcome.ready.is_empty());
        assert_eq!(outcome.later, BTreeSet::from([cell]));
        assert_eq!(outcome.estimated_wait, Some(DEFAULT_ESTIMATED_WAIT));
        assert_eq!(pipeline.dispatched(), vec![cell]);
    }

    #[tokio::test]
    async fn test_coarse_cell_accumulates_its_leaf_descendants() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let parent = cell_at(54.53097, 5.96836, Resolution::Eleven);

        let resolver = resolver_with(store, pipeline.clone());
        let outcome = resolver
            .resolve_batch(&BTreeSet::from([parent]))
            .await
            .unwrap();

        assert_eq!(outcome.later, BTreeSet::from([parent]));
        let dispatched: BTreeSet<_> = pipeline.dispatched().into_iter().collect();
        let expected: BTreeSet<_> = cell::leaf_descendants(parent).collect();
        assert_eq!(dispatched, expected);
    }

    #[tokio::test]
    async fn test_population_is_batched_across_cells() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let a = cell_at(54.53097, 5.96836, Resolution::Twelve);
        let b = cell_at(40.7128, -74.0060, Resolution::Twelve);

        let resolver = resolver_with(store, pipeline.clone());
        resolver
            .resolve_batch(&BTreeSet::from([a, b]))
            .await
            .unwrap();

        assert_eq!(pipeline.batch_count(), 1, "one dispatch per request batch");
        assert_eq!(pipeline.dispatched().len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_request_is_idempotent() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let cell = cell_at(54.53097, 5.96836, Resolution::Twelve);
        let resolver = resolver_with(store, pipeline.clone());

        let first = resolver
            .resolve_batch(&BTreeSet::from([cell]))
            .await
            .unwrap();
        let second = resolver
            .resolve_batch(&BTreeSet::from([cell]))
            .await
            .unwrap();

        assert_eq!(first.later, second.later);
        assert_eq!(pipeline.batch_count(), 1, "no duplicate population request");
    }

    #[tokio::test]
    async fn test_mixed_batch_partitions_exhaustively() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let known = cell_at(54.53097, 5.96836, Resolution::Twelve);
        let unknown = cell_at(40.7128, -74.0060, Resolution::Twelve);
        store
            .put(known, 59.0, ElevationSource::Measured)
            .await
            .unwrap();

        let resolver = resolver_with(store, pipeline);
        let request = BTreeSet::from([known, unknown]);
        let outcome = resolver.resolve_batch(&request).await.unwrap();

        for cell in &request {
            let in_ready = outcome.ready.contains_key(cell);
            let in_later = outcome.later.contains(cell);
            assert!(in_ready ^ in_later, "cell must be in exactly one bucket");
        }
    }

    #[tokio::test]
    async fn test_derivable_parent_is_ready() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let parent = cell_at(54.53097, 5.96836, Resolution::Eleven);
        for (index, child) in cell::direct_children(parent).into_iter().enumerate() {
            let elevation = [10.0, 20.0, 30.0, 10.0, 20.0, 30.0, 20.0][index];
            store
                .put(child, elevation, ElevationSource::Measured)
                .await
                .unwrap();
        }

        let resolver = resolver_with(store, pipeline.clone());
        let outcome = resolver
            .resolve_batch(&BTreeSet::from([parent]))
            .await
            .unwrap();

        assert_eq!(outcome.ready.get(&parent), Some(&20.0));
        assert!(outcome.later.is_empty());
        assert_eq!(pipeline.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_unserved_resolution_is_rejected() {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let too_fine = cell_at(54.53097, 5.96836, Resolution::Thirteen);

        let resolver = resolver_with(store, pipeline.clone());
        let err = resolver
            .resolve_batch(&BTreeSet::from([too_fine]))
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::UnservedResolution(13)));
        assert_eq!(pipeline.batch_count(), 0);
    }
}
