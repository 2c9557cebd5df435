//! Population of missing base-resolution cells.
//!
//! When aggregation cannot produce an elevation, the missing leaf cells are
//! handed to an external extraction pipeline. The hand-off is asynchronous:
//! [`PopulationRequester`] claims the cells, dispatches one batch, and
//! returns a wait estimate without blocking on extraction. The pipeline
//! eventually writes results back through [`apply_extraction`], which also
//! guarantees that cells the dataset does not cover (open ocean) receive
//! the conventional default instead of staying in flight forever.
//!
//! There is no cancellation: once a cell is `Extracting` the job runs to
//! completion whether or not anyone is still asking.

mod worker;

pub use worker::{
    ChannelPipeline, ExtractError, ExtractionWorker, Extractor, DEFAULT_BATCH_CHANNEL_CAPACITY,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use h3o::CellIndex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cell::{CellStatus, ElevationSource};
use crate::store::{BoxFuture, CellStore, StoreError};

/// Default completion estimate returned to callers, in seconds.
pub const DEFAULT_ESTIMATED_WAIT: Duration = Duration::from_secs(240);

/// Elevation written for cells the source dataset does not cover.
///
/// Open ocean is reported as 0 m by dataset convention; writing it keeps
/// uncovered cells from being re-requested on every query.
pub const OCEAN_DEFAULT_ELEVATION: f64 = 0.0;

/// Errors reported synchronously by a population request.
///
/// Extraction failures are never reported here; they surface only through
/// the default-elevation fallback in the write-back path.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pipeline could not accept the batch.
    #[error("population pipeline unreachable: {0}")]
    Unreachable(String),

    /// Claiming cells in the store failed before dispatch.
    #[error("population state update failed: {0}")]
    Store(#[from] StoreError),
}

/// Asynchronous extraction pipeline, an external collaborator.
///
/// `dispatch` must enqueue the batch and return without waiting for
/// extraction to complete. The pipeline owns retries and timeouts, and must
/// eventually move every dispatched cell out of `Extracting` by writing an
/// elevation (measured or default) and marking it `Extracted`.
pub trait ExtractionPipeline: Send + Sync {
    /// Hand a batch of base-resolution cells to the pipeline.
    fn dispatch(&self, cells: Vec<CellIndex>) -> BoxFuture<'_, Result<(), DispatchError>>;
}

/// Requests extraction of unknown leaf cells, without blocking the caller.
pub struct PopulationRequester {
    store: Arc<dyn CellStore>,
    pipeline: Arc<dyn ExtractionPipeline>,
    estimated_wait: Duration,
}

impl PopulationRequester {
    /// Create a requester with the default wait estimate.
    pub fn new(store: Arc<dyn CellStore>, pipeline: Arc<dyn ExtractionPipeline>) -> Self {
        Self {
            store,
            pipeline,
            estimated_wait: DEFAULT_ESTIMATED_WAIT,
        }
    }

    /// Override the wait estimate reported to callers.
    pub fn with_estimated_wait(mut self, estimated_wait: Duration) -> Self {
        self.estimated_wait = estimated_wait;
        self
    }

    /// The wait estimate reported to callers.
    pub fn estimated_wait(&self) -> Duration {
        self.estimated_wait
    }

    /// Request extraction for every cell in the set that is not already in
    /// flight or done.
    ///
    /// Idempotent per cell: anything `Extracting` or `Extracted` is skipped,
    /// so re-submitting the same set while a batch is in flight dispatches
    /// nothing new. Returns the completion estimate either way, since the
    /// caller's cells are pending regardless of who dispatched them.
    ///
    /// # Errors
    ///
    /// [`DispatchError`] if the pipeline rejects the batch. Claimed cells
    /// are reverted to `Unextracted` so the caller can retry.
    pub async fn request_population(
        &self,
        cells: &BTreeSet<CellIndex>,
    ) -> Result<Duration, DispatchError> {
        let mut claimed = Vec::new();
        for &cell in cells {
            if self.store.status(cell).await? == CellStatus::Unextracted {
                self.store.mark_status(cell, CellStatus::Extracting).await?;
                claimed.push(cell);
            }
        }

        if claimed.is_empty() {
            debug!(
                requested = cells.len(),
                "no new cells to populate, batch already in flight"
            );
            return Ok(self.estimated_wait);
        }

        if let Err(err) = self.pipeline.dispatch(claimed.clone()).await {
            for &cell in &claimed {
                if let Err(revert_err) = self
                    .store
                    .mark_status(cell, CellStatus::Unextracted)
                    .await
                {
                    warn!(%cell, error = %revert_err, "failed to revert claim after dispatch error");
                }
            }
            return Err(err);
        }

        info!(
            dispatched = claimed.len(),
            skipped = cells.len() - claimed.len(),
            "dispatched extraction batch"
        );
        Ok(self.estimated_wait)
    }
}

/// Result of extracting one cell from the raw dataset.
///
/// `elevation: None` means the dataset has no coverage for the cell; the
/// write-back substitutes [`OCEAN_DEFAULT_ELEVATION`].
#[derive(Clone, Copy, Debug)]
pub struct ExtractionOutcome {
    pub cell: CellIndex,
    pub elevation: Option<f64>,
}

/// Write extraction results back into the store.
///
/// Every cell is marked `Extracted`, covered by data or not, so nothing
/// dispatched can stay `Extracting` forever. A value conflict means another
/// writer got there first with a differing elevation; the stored value wins
/// and the status transition still happens.
pub async fn apply_extraction(
    store: &dyn CellStore,
    outcomes: &[ExtractionOutcome],
) -> Result<(), StoreError> {
    for outcome in outcomes {
        let elevation = outcome.elevation.unwrap_or(OCEAN_DEFAULT_ELEVATION);
        match store
            .put(outcome.cell, elevation, ElevationSource::Measured)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { existing, .. }) => {
                warn!(
                    cell = %outcome.cell,
                    existing,
                    extracted = elevation,
                    "extracted elevation conflicts with stored value, keeping stored"
                );
            }
            Err(err) => return Err(err),
        }
        store.mark_status(outcome.cell, CellStatus::Extracted).await?;
    }
    Ok(())
}
