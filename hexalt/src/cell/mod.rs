//! Cell data model for the elevation grid.
//!
//! Elevations are keyed by H3 cell index. The index itself encodes position,
//! resolution and base-cell metadata, so the parent/child hierarchy is a pure
//! function of the identifier; nothing in this module holds state.
//!
//! Three resolution constants shape the whole crate:
//!
//! - [`MIN_SERVED_RESOLUTION`] / [`MAX_SERVED_RESOLUTION`] bound the window
//!   of resolutions a query may ask for (8 through 12 inclusive).
//! - [`BASE_EXTRACTION_RESOLUTION`] is the finest resolution the raw dataset
//!   is ever sampled at. Cells at this resolution are leaves: their
//!   elevations are measured, never derived. Every coarser resolution is an
//!   average of children, computed bottom-up.

use std::fmt;

use h3o::{CellIndex, Resolution};

/// Coarsest resolution a query may request.
pub const MIN_SERVED_RESOLUTION: Resolution = Resolution::Eight;

/// Finest resolution a query may request.
pub const MAX_SERVED_RESOLUTION: Resolution = Resolution::Twelve;

/// Resolution at which raw elevations are extracted from the source dataset.
///
/// Cells at this resolution have no children to aggregate from; a missing
/// elevation here must be escalated to population, never derived.
pub const BASE_EXTRACTION_RESOLUTION: Resolution = Resolution::Twelve;

/// Source-extraction state of a base-resolution cell.
///
/// Unknown cells are `Unextracted` by default. A cell transitions to
/// `Extracting` when handed to the population pipeline and to `Extracted`
/// once the pipeline has written an elevation back, including the default
/// written for cells the dataset does not cover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CellStatus {
    /// Never referenced by a population request.
    #[default]
    Unextracted,
    /// Handed to the extraction pipeline; completion pending.
    Extracting,
    /// Elevation written back, directly measured or defaulted.
    Extracted,
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellStatus::Unextracted => "unextracted",
            CellStatus::Extracting => "extracting",
            CellStatus::Extracted => "extracted",
        };
        f.write_str(name)
    }
}

/// Provenance of a stored elevation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElevationSource {
    /// Extracted directly from the raw dataset.
    Measured,
    /// Computed as the mean of child elevations.
    Derived,
}

impl fmt::Display for ElevationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElevationSource::Measured => "measured",
            ElevationSource::Derived => "derived",
        };
        f.write_str(name)
    }
}

/// Returns true if elevations may be served at this resolution.
pub fn is_served(resolution: Resolution) -> bool {
    (u8::from(MIN_SERVED_RESOLUTION)..=u8::from(MAX_SERVED_RESOLUTION))
        .contains(&u8::from(resolution))
}

/// The resolution of a cell's direct children, or `None` at the base
/// extraction resolution and below, where cells are leaves.
pub fn child_resolution(resolution: Resolution) -> Option<Resolution> {
    if u8::from(resolution) >= u8::from(BASE_EXTRACTION_RESOLUTION) {
        return None;
    }
    Resolution::try_from(u8::from(resolution) + 1).ok()
}

/// Direct children of a cell, one resolution finer.
///
/// Seven cells for hexagons, six for the rare pentagon cells. Empty for
/// cells at or below the base extraction resolution.
pub fn direct_children(cell: CellIndex) -> Vec<CellIndex> {
    match child_resolution(cell.resolution()) {
        Some(finer) => cell.children(finer).collect(),
        None => Vec::new(),
    }
}

/// All descendants of a cell at the base extraction resolution.
///
/// A cell already at the base resolution yields itself.
pub fn leaf_descendants(cell: CellIndex) -> impl Iterator<Item = CellIndex> {
    cell.children(BASE_EXTRACTION_RESOLUTION)
}
