//! Hexalt CLI - Command-line interface
//!
//! Answers elevation queries from stdin, one JSON query per line, one JSON
//! response per line. The service runs against an in-memory store and an
//! in-process extraction worker sampling a synthetic terrain, so the lazy
//! population protocol is observable interactively: an unknown cell comes
//! back `later`, and re-submitting the same query a moment later returns
//! its elevation.
//!
//! ```text
//! $ hexalt
//! {"coordinates": [[54.53097, 5.96836]]}
//! {"elevations":{},"later":[631053048207246335],"estimated_wait_time":2}
//! {"coordinates": [[54.53097, 5.96836]]}
//! {"elevations":{"631053048207246335":312.44}}
//! ```

use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use h3o::{CellIndex, LatLng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hexalt::populate::{
    ChannelPipeline, ExtractError, ExtractionWorker, Extractor, DEFAULT_BATCH_CHANNEL_CAPACITY,
};
use hexalt::query::ElevationQuery;
use hexalt::service::{ElevationService, ServiceConfig};
use hexalt::store::{BoxFuture, MemoryCellStore};

#[derive(Parser)]
#[command(name = "hexalt")]
#[command(version = hexalt::VERSION)]
#[command(about = "Serve lazily populated H3 cell elevations over stdin", long_about = None)]
struct Args {
    /// Completion estimate reported for deferred cells, in seconds
    #[arg(long, default_value = "2")]
    wait_estimate: u64,

    /// Maximum cells per direct or coordinate query
    #[arg(long, default_value = "15")]
    cell_limit: usize,

    /// Maximum cells a polygon query may expand to
    #[arg(long, default_value = "1500")]
    polygon_cell_limit: usize,

    /// Artificial delay per extracted cell, in milliseconds
    #[arg(long, default_value = "100")]
    extraction_delay_ms: u64,

    /// Pretty-print JSON responses
    #[arg(long)]
    pretty: bool,
}

/// Deterministic terrain stand-in for the raw elevation dataset.
///
/// Elevation is a smooth function of the cell center, negative over about a
/// third of the globe. Negative samples report no coverage, exercising the
/// ocean-default write-back path.
struct SyntheticTerrain {
    delay: Duration,
}

impl Extractor for SyntheticTerrain {
    fn extract(&self, cell: CellIndex) -> BoxFuture<'_, Result<Option<f64>, ExtractError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            let center = LatLng::from(cell);
            let lat = center.lat_radians();
            let lng = center.lng_radians();
            let elevation = (lat * 3.0).sin() * (lng * 2.0).cos() * 1200.0 + 350.0;
            if elevation < 0.0 {
                Ok(None)
            } else {
                Ok(Some((elevation * 100.0).round() / 100.0))
            }
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.cell_limit == 0 || args.polygon_cell_limit == 0 {
        eprintln!("Error: cell limits must be at least 1");
        process::exit(1);
    }

    let config = ServiceConfig::default()
        .with_single_request_cell_limit(args.cell_limit)
        .with_polygon_cell_limit(args.polygon_cell_limit)
        .with_estimated_wait(Duration::from_secs(args.wait_estimate));

    let store = Arc::new(MemoryCellStore::new());
    let (pipeline, batches) = ChannelPipeline::new(DEFAULT_BATCH_CHANNEL_CAPACITY);
    let extractor = Arc::new(SyntheticTerrain {
        delay: Duration::from_millis(args.extraction_delay_ms),
    });

    let shutdown = CancellationToken::new();
    let worker = ExtractionWorker::new(store.clone(), extractor, batches);
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let service = ElevationService::new(store, Arc::new(pipeline), config);
    info!("reading queries from stdin, one JSON object per line");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("Error reading stdin: {}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = answer(&service, &line, args.pretty).await;
        if writeln!(stdout, "{}", output).and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }

    debug!("stdin closed, shutting down");
    shutdown.cancel();
    let _ = worker_handle.await;
}

/// Answer one query line with a JSON response or a JSON error object.
async fn answer(service: &ElevationService, line: &str, pretty: bool) -> String {
    let query: ElevationQuery = match serde_json::from_str(line) {
        Ok(query) => query,
        Err(err) => return error_json(&format!("invalid query: {}", err)),
    };

    match service.handle(&query).await {
        Ok(response) => {
            let serialized = if pretty {
                serde_json::to_string_pretty(&response)
            } else {
                serde_json::to_string(&response)
            };
            serialized.unwrap_or_else(|err| error_json(&format!("serialization failed: {}", err)))
        }
        Err(err) => error_json(&err.to_string()),
    }
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
