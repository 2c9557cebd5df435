//! Wire types and request validation.
//!
//! A query arrives as one of three JSON forms:
//!
//! ```json
//! {"h3_cells": [631053048207246335]}
//! {"coordinates": [[54.53097, 5.96836]], "resolution": 10}
//! {"polygon": [[54.5, 5.9], [54.6, 5.9], [54.6, 6.0]], "resolution": 9}
//! ```
//!
//! and is answered with
//!
//! ```json
//! {"elevations": {"631053048207246335": 32.1},
//!  "later": [631053048207246336],
//!  "estimated_wait_time": 240}
//! ```
//!
//! Validation runs before the resolver is ever invoked: form exclusivity,
//! cell-count limits, the served resolution window and coordinate sanity
//! are all rejected here with descriptive messages. Geometry-to-cell
//! conversion is delegated to the grid library.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use geo::{LineString, Polygon};
use h3o::geom::TilerBuilder;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell;
use crate::resolver::BatchOutcome;
use crate::service::ServiceConfig;

/// An elevation query in one of the three wire forms.
///
/// Exactly one of `h3_cells`, `coordinates` and `polygon` must be present;
/// `resolution` applies to the coordinate and polygon forms and defaults to
/// the base extraction resolution.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElevationQuery {
    pub h3_cells: Option<Vec<u64>>,
    pub coordinates: Option<Vec<[f64; 2]>>,
    pub polygon: Option<Vec<[f64; 2]>>,
    pub resolution: Option<u8>,
}

/// Rejection of a query before resolution, a 4xx-equivalent.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("one of `h3_cells`, `coordinates` or `polygon` must be provided")]
    MissingForm,

    #[error("only one of `h3_cells`, `coordinates` or `polygon` may be provided")]
    ConflictingForms,

    #[error("request for zero cells rejected")]
    Empty,

    #[error("request for {count} cells rejected, only {limit} cells can be sent per request")]
    TooManyCells { count: usize, limit: usize },

    #[error("{0} is not a valid H3 cell, aborting request")]
    InvalidCell(u64),

    #[error("request for resolution {0} rejected, the resolution must be between 8 and 12 inclusive")]
    ResolutionOutOfRange(u8),

    #[error("({lat}, {lng}) is not a valid latitude/longitude pair")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("a polygon needs at least 3 vertices, got {0}")]
    DegeneratePolygon(usize),

    #[error("polygon is not a valid geometry")]
    InvalidGeometry,
}

/// Validate a query and convert it to the set of target cells.
pub fn validate(
    query: &ElevationQuery,
    config: &ServiceConfig,
) -> Result<BTreeSet<CellIndex>, ValidationError> {
    match (&query.h3_cells, &query.coordinates, &query.polygon) {
        (Some(raw_cells), None, None) => validate_cells(raw_cells, config),
        (None, Some(coordinates), None) => {
            let resolution = served_resolution(query.resolution, config)?;
            validate_coordinates(coordinates, resolution, config)
        }
        (None, None, Some(polygon)) => {
            let resolution = served_resolution(query.resolution, config)?;
            validate_polygon(polygon, resolution, config)
        }
        (None, None, None) => Err(ValidationError::MissingForm),
        _ => Err(ValidationError::ConflictingForms),
    }
}

fn validate_cells(
    raw_cells: &[u64],
    config: &ServiceConfig,
) -> Result<BTreeSet<CellIndex>, ValidationError> {
    if raw_cells.is_empty() {
        return Err(ValidationError::Empty);
    }
    if raw_cells.len() > config.single_request_cell_limit {
        return Err(ValidationError::TooManyCells {
            count: raw_cells.len(),
            limit: config.single_request_cell_limit,
        });
    }

    let mut cells = BTreeSet::new();
    for &raw in raw_cells {
        let cell =
            CellIndex::try_from(raw).map_err(|_| ValidationError::InvalidCell(raw))?;
        if !cell::is_served(cell.resolution()) {
            return Err(ValidationError::ResolutionOutOfRange(u8::from(
                cell.resolution(),
            )));
        }
        cells.insert(cell);
    }
    Ok(cells)
}

fn validate_coordinates(
    coordinates: &[[f64; 2]],
    resolution: Resolution,
    config: &ServiceConfig,
) -> Result<BTreeSet<CellIndex>, ValidationError> {
    if coordinates.is_empty() {
        return Err(ValidationError::Empty);
    }
    if coordinates.len() > config.single_request_cell_limit {
        return Err(ValidationError::TooManyCells {
            count: coordinates.len(),
            limit: config.single_request_cell_limit,
        });
    }

    let mut cells = BTreeSet::new();
    for &[lat, lng] in coordinates {
        let point = LatLng::new(lat, lng)
            .map_err(|_| ValidationError::InvalidCoordinate { lat, lng })?;
        cells.insert(point.to_cell(resolution));
    }
    Ok(cells)
}

fn validate_polygon(
    vertices: &[[f64; 2]],
    resolution: Resolution,
    config: &ServiceConfig,
) -> Result<BTreeSet<CellIndex>, ValidationError> {
    if vertices.len() < 3 {
        return Err(ValidationError::DegeneratePolygon(vertices.len()));
    }
    for &[lat, lng] in vertices {
        LatLng::new(lat, lng).map_err(|_| ValidationError::InvalidCoordinate { lat, lng })?;
    }

    // Ring coordinates are (x, y) = (lng, lat) for the geometry library.
    let ring: Vec<(f64, f64)> = vertices.iter().map(|&[lat, lng]| (lng, lat)).collect();
    let polygon = Polygon::new(LineString::from(ring), Vec::new());

    let mut tiler = TilerBuilder::new(resolution).build();
    tiler
        .add(polygon)
        .map_err(|_| ValidationError::InvalidGeometry)?;
    let cells: BTreeSet<CellIndex> = tiler.into_coverage().collect();

    if cells.is_empty() {
        return Err(ValidationError::Empty);
    }
    if cells.len() > config.polygon_cell_limit {
        return Err(ValidationError::TooManyCells {
            count: cells.len(),
            limit: config.polygon_cell_limit,
        });
    }
    Ok(cells)
}

/// Resolve and bounds-check the requested resolution.
fn served_resolution(
    requested: Option<u8>,
    config: &ServiceConfig,
) -> Result<Resolution, ValidationError> {
    let Some(raw) = requested else {
        return Ok(config.default_resolution);
    };
    let resolution =
        Resolution::try_from(raw).map_err(|_| ValidationError::ResolutionOutOfRange(raw))?;
    if !cell::is_served(resolution) {
        return Err(ValidationError::ResolutionOutOfRange(raw));
    }
    Ok(resolution)
}

/// The wire response: resolved elevations keyed by cell index, plus the
/// deferred cells and a completion estimate when population was triggered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElevationResponse {
    pub elevations: BTreeMap<u64, f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub later: Option<Vec<u64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_time: Option<u64>,
}

impl From<BatchOutcome> for ElevationResponse {
    fn from(outcome: BatchOutcome) -> Self {
        let elevations = outcome
            .ready
            .into_iter()
            .map(|(cell, elevation)| (u64::from(cell), elevation))
            .collect();
        let later = if outcome.later.is_empty() {
            None
        } else {
            Some(outcome.later.iter().map(|&cell| u64::from(cell)).collect())
        };
        Self {
            elevations,
            later,
            estimated_wait_time: outcome.estimated_wait.map(|wait| wait.as_secs()),
        }
    }
}
