//! Service configuration.

use std::time::Duration;

use h3o::Resolution;

use crate::cell::BASE_EXTRACTION_RESOLUTION;
use crate::populate::DEFAULT_ESTIMATED_WAIT;

/// Maximum cells per request for the direct and coordinate forms.
pub const DEFAULT_SINGLE_REQUEST_CELL_LIMIT: usize = 15;

/// Maximum cells a polygon may expand to.
pub const DEFAULT_POLYGON_CELL_LIMIT: usize = 1500;

/// Tunable limits and defaults for an [`ElevationService`].
///
/// The defaults match the production deployment; tests and the CLI
/// override individual fields with the builder methods.
///
/// [`ElevationService`]: crate::service::ElevationService
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Cell limit for the `h3_cells` and `coordinates` forms.
    pub single_request_cell_limit: usize,

    /// Cell limit for the expanded `polygon` form.
    pub polygon_cell_limit: usize,

    /// Completion estimate reported alongside deferred cells.
    pub estimated_wait: Duration,

    /// Resolution used when a coordinate or polygon query omits one.
    ///
    /// Defaults to the base extraction resolution, where lookups are
    /// direct store hits.
    pub default_resolution: Resolution,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            single_request_cell_limit: DEFAULT_SINGLE_REQUEST_CELL_LIMIT,
            polygon_cell_limit: DEFAULT_POLYGON_CELL_LIMIT,
            estimated_wait: DEFAULT_ESTIMATED_WAIT,
            default_resolution: BASE_EXTRACTION_RESOLUTION,
        }
    }
}

impl ServiceConfig {
    /// Set the cell limit for direct and coordinate queries.
    pub fn with_single_request_cell_limit(mut self, limit: usize) -> Self {
        self.single_request_cell_limit = limit;
        self
    }

    /// Set the cell limit for polygon expansion.
    pub fn with_polygon_cell_limit(mut self, limit: usize) -> Self {
        self.polygon_cell_limit = limit;
        self
    }

    /// Set the completion estimate reported to callers.
    pub fn with_estimated_wait(mut self, estimated_wait: Duration) -> Self {
        self.estimated_wait = estimated_wait;
        self
    }

    /// Set the default resolution for coordinate and polygon queries.
    pub fn with_default_resolution(mut self, resolution: Resolution) -> Self {
        self.default_resolution = resolution;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_limits() {
        let config = ServiceConfig::default();
        assert_eq!(config.single_request_cell_limit, 15);
        assert_eq!(config.polygon_cell_limit, 1500);
        assert_eq!(config.estimated_wait, Duration::from_secs(240));
        assert_eq!(config.default_resolution, Resolution::Twelve);
    }

    #[test]
    fn test_builders_override_fields() {
        let config = ServiceConfig::default()
            .with_single_request_cell_limit(5)
            .with_polygon_cell_limit(100)
            .with_estimated_wait(Duration::from_secs(30))
            .with_default_resolution(Resolution::Ten);

        assert_eq!(config.single_request_cell_limit, 5);
        assert_eq!(config.polygon_cell_limit, 100);
        assert_eq!(config.estimated_wait, Duration::from_secs(30));
        assert_eq!(config.default_resolution, Resolution::Ten);
    }
}
