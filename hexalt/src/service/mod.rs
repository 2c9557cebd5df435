//! Service facade.
//!
//! [`ElevationService`] wires the store, the population requester and the
//! resolver together behind one `handle` call: validate the query, resolve
//! the batch, shape the response. This is the surface an HTTP layer (out of
//! scope here) or the CLI mounts.

mod config;

pub use config::{
    ServiceConfig, DEFAULT_POLYGON_CELL_LIMIT, DEFAULT_SINGLE_REQUEST_CELL_LIMIT,
};

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::populate::{DispatchError, ExtractionPipeline, PopulationRequester};
use crate::query::{self, ElevationQuery, ElevationResponse, ValidationError};
use crate::resolver::{ElevationResolver, ResolveError};
use crate::store::{CellStore, StoreError};

/// Errors surfaced by [`ElevationService::handle`].
///
/// `Validation` maps to a client error, `Dispatch` to a transient failure
/// the client should retry, `Store` to an internal failure. Conflicting
/// re-derivations never appear here: they are logged inside the resolver
/// and the stored value wins.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("population could not be requested, please retry: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("internal store failure: {0}")]
    Store(#[from] StoreError),
}

impl From<ResolveError> for ServiceError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnservedResolution(resolution) => {
                ServiceError::Validation(ValidationError::ResolutionOutOfRange(resolution))
            }
            ResolveError::Dispatch(err) => ServiceError::Dispatch(err),
        }
    }
}

/// The assembled elevation service.
pub struct ElevationService {
    config: ServiceConfig,
    resolver: ElevationResolver,
}

impl ElevationService {
    /// Wire a service from a store, an extraction pipeline and a config.
    pub fn new(
        store: Arc<dyn CellStore>,
        pipeline: Arc<dyn ExtractionPipeline>,
        config: ServiceConfig,
    ) -> Self {
        info!(
            cell_limit = config.single_request_cell_limit,
            polygon_cell_limit = config.polygon_cell_limit,
            estimated_wait_secs = config.estimated_wait.as_secs(),
            "elevation service starting"
        );
        let requester = PopulationRequester::new(Arc::clone(&store), pipeline)
            .with_estimated_wait(config.estimated_wait);
        let resolver = ElevationResolver::new(store, requester);
        Self { config, resolver }
    }

    /// The active configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Answer one elevation query.
    pub async fn handle(&self, query: &ElevationQuery) -> Result<ElevationResponse, ServiceError> {
        let cells = query::validate(query, &self.config)?;
        debug!(cells = cells.len(), "query validated");
        let outcome = self.resolver.resolve_batch(&cells).await?;
        debug!(
            ready = outcome.ready.len(),
            later = outcome.later.len(),
            "batch resolved"
        );
        Ok(ElevationResponse::from(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ElevationSource;
    use crate::populate::DEFAULT_ESTIMATED_WAIT;
    use crate::store::{BoxFuture, MemoryCellStore};
    use h3o::{CellIndex, LatLng, Resolution};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPipeline {
        batches: Mutex<Vec<Vec<CellIndex>>>,
    }

    impl ExtractionPipeline for RecordingPipeline {
        fn dispatch(&self, cells: Vec<CellIndex>) -> BoxFuture<'_, Result<(), DispatchError>> {
            Box::pin(async move {
                self.batches.lock().push(cells);
                Ok(())
            })
        }
    }

    fn service() -> (ElevationService, Arc<MemoryCellStore>, Arc<RecordingPipeline>) {
        let store = Arc::new(MemoryCellStore::new());
        let pipeline = Arc::new(RecordingPipeline::default());
        let service = ElevationService::new(
            store.clone(),
            pipeline.clone(),
            ServiceConfig::default(),
        );
        (service, store, pipeline)
    }

    fn leaf() -> CellIndex {
        LatLng::new(54.53097, 5.96836)
            .unwrap()
            .to_cell(Resolution::Twelve)
    }

    #[tokio::test]
    async fn test_known_cell_is_served_immediately() {
        let (service, store, pipeline) = service();
        store
            .put(leaf(), 32.1, ElevationSource::Measured)
            .await
            .unwrap();

        let query = ElevationQuery {
            h3_cells: Some(vec![u64::from(leaf())]),
            ..Default::default()
        };
        let response = service.handle(&query).await.unwrap();

        assert_eq!(response.elevations.get(&u64::from(leaf())), Some(&32.1));
        assert_eq!(response.later, None);
        assert_eq!(response.estimated_wait_time, None);
        assert!(pipeline.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_cell_is_deferred_with_estimate() {
        let (service, _store, pipeline) = service();

        let query = ElevationQuery {
            h3_cells: Some(vec![u64::from(leaf())]),
            ..Default::default()
        };
        let response = service.handle(&query).await.unwrap();

        assert!(response.elevations.is_empty());
        assert_eq!(response.later, Some(vec![u64::from(leaf())]));
        assert_eq!(
            response.estimated_wait_time,
            Some(DEFAULT_ESTIMATED_WAIT.as_secs())
        );
        assert_eq!(pipeline.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_the_resolver() {
        let (service, _store, pipeline) = service();

        let query = ElevationQuery {
            coordinates: Some(vec![[54.53097, 5.96836]]),
            resolution: Some(13),
            ..Default::default()
        };
        let err = service.handle(&query).await.unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::ResolutionOutOfRange(13))
        ));
        assert!(pipeline.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_transient() {
        struct DeadPipeline;
        impl ExtractionPipeline for DeadPipeline {
            fn dispatch(
                &self,
                _cells: Vec<CellIndex>,
            ) -> BoxFuture<'_, Result<(), DispatchError>> {
                Box::pin(async {
                    Err(DispatchError::Unreachable("pipeline offline".to_string()))
                })
            }
        }

        let store = Arc::new(MemoryCellStore::new());
        let service = ElevationService::new(
            store,
            Arc::new(DeadPipeline),
            ServiceConfig::default(),
        );

        let query = ElevationQuery {
            h3_cells: Some(vec![u64::from(leaf())]),
            ..Default::default()
        };
        let err = service.handle(&query).await.unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(_)));
    }
}
