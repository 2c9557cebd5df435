//! In-process extraction pipeline.
//!
//! Production deployments hand batches to an external raw-data pipeline;
//! tests and the CLI run this channel-fed stand-in instead. The shape is a
//! long-lived worker task draining a bounded mpsc channel until cancelled,
//! with the same write-back guarantees the external pipeline must provide.

use std::sync::Arc;

use h3o::CellIndex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::populate::{apply_extraction, DispatchError, ExtractionOutcome, ExtractionPipeline};
use crate::store::{BoxFuture, CellStore};

/// Default capacity of the batch channel.
pub const DEFAULT_BATCH_CHANNEL_CAPACITY: usize = 64;

/// Error produced by an [`Extractor`] for a single cell.
#[derive(Debug, Error)]
#[error("extraction failed: {0}")]
pub struct ExtractError(pub String);

/// Samples the raw dataset for one base-resolution cell.
///
/// `Ok(None)` means the dataset has no coverage there; the worker writes
/// the ocean default in that case. Errors are treated the same way, so a
/// flaky sampler can never strand a cell in `Extracting`.
pub trait Extractor: Send + Sync {
    fn extract(&self, cell: CellIndex) -> BoxFuture<'_, Result<Option<f64>, ExtractError>>;
}

/// [`ExtractionPipeline`] over a bounded channel to an [`ExtractionWorker`].
pub struct ChannelPipeline {
    tx: mpsc::Sender<Vec<CellIndex>>,
}

impl ChannelPipeline {
    /// Create the pipeline and the receiver its worker drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<CellIndex>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ExtractionPipeline for ChannelPipeline {
    fn dispatch(&self, cells: Vec<CellIndex>) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async move {
            // try_send keeps dispatch non-blocking; a full queue is a
            // transient failure the caller can retry.
            self.tx.try_send(cells).map_err(|err| match err {
                TrySendError::Full(_) => {
                    DispatchError::Unreachable("extraction queue is full".to_string())
                }
                TrySendError::Closed(_) => {
                    DispatchError::Unreachable("extraction worker has stopped".to_string())
                }
            })
        })
    }
}

/// Background task that extracts dispatched batches and writes them back.
pub struct ExtractionWorker<E: Extractor> {
    store: Arc<dyn CellStore>,
    extractor: Arc<E>,
    rx: mpsc::Receiver<Vec<CellIndex>>,
}

impl<E: Extractor> ExtractionWorker<E> {
    pub fn new(
        store: Arc<dyn CellStore>,
        extractor: Arc<E>,
        rx: mpsc::Receiver<Vec<CellIndex>>,
    ) -> Self {
        Self {
            store,
            extractor,
            rx,
        }
    }

    /// Drain batches until the channel closes or `shutdown` fires.
    ///
    /// A batch in progress is finished before shutdown completes, keeping
    /// the no-stuck-cells guarantee.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("extraction worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("extraction worker shutting down");
                    break;
                }
                batch = self.rx.recv() => {
                    match batch {
                        Some(cells) => self.process_batch(cells).await,
                        None => {
                            debug!("batch channel closed, worker exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn process_batch(&self, cells: Vec<CellIndex>) {
        debug!(cells = cells.len(), "processing extraction batch");
        let mut outcomes = Vec::with_capacity(cells.len());
        for cell in cells {
            let elevation = match self.extractor.extract(cell).await {
                Ok(elevation) => elevation,
                Err(err) => {
                    warn!(%cell, error = %err, "extraction failed, writing default");
                    None
                }
            };
            outcomes.push(ExtractionOutcome { cell, elevation });
        }

        if let Err(err) = apply_extraction(self.store.as_ref(), &outcomes).await {
            warn!(error = %err, "failed to write back extraction batch");
        } else {
            info!(cells = outcomes.len(), "extraction batch written back");
        }
    }
}
