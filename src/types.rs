//! Core types and configuration for GeoFlux
//!
//! This module provides the serializable configuration, the query criteria
//! passed to [`crate::GeoFlux::query`] and
//! [`crate::GeoQuery::update_criteria`], and the stored record shape shared
//! with the datastore.

use crate::codec;
use geo::Point;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A record held by the underlying datastore for one key.
///
/// `geohash` is the encoding of `location` at the system precision; the two
/// fields are written and removed atomically by the writer, so a reader
/// never observes one without the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The opaque key this record is stored under
    pub key: String,
    /// Geohash of `location`, used by the datastore's ordered-range index
    pub geohash: String,
    /// The geographic point (x = longitude, y = latitude)
    pub location: Point<f64>,
}

/// Configuration for a GeoFlux instance and the queries it creates.
///
/// The cleanup knobs control the deferred teardown of range subscriptions:
/// a query that pans by small amounts thrashes its range set, and keeping
/// recently-used ranges briefly avoids reopening a subscription the
/// datastore just closed.
///
/// # Example
///
/// ```rust
/// use geoflux::Config;
/// use std::time::Duration;
///
/// let config = Config::with_geohash_precision(10)
///     .with_max_idle_ranges(50)
///     .with_cleanup_debounce(Duration::from_millis(10));
///
/// // Also loadable from JSON
/// let json = r#"{ "geohash_precision": 8 }"#;
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.geohash_precision, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Geohash precision for stored records and range planning (1-12)
    #[serde(default = "Config::default_geohash_precision")]
    pub geohash_precision: usize,

    /// Number of range subscriptions above which a debounced teardown
    /// of inactive ranges is scheduled
    #[serde(default = "Config::default_max_idle_ranges")]
    pub max_idle_ranges: usize,

    /// Delay between crossing `max_idle_ranges` and the teardown running
    #[serde(default = "Config::default_cleanup_debounce")]
    pub cleanup_debounce: Duration,

    /// Period of the unconditional teardown sweep
    #[serde(default = "Config::default_cleanup_interval")]
    pub cleanup_interval: Duration,
}

impl Config {
    const fn default_geohash_precision() -> usize {
        10
    }

    const fn default_max_idle_ranges() -> usize {
        25
    }

    const fn default_cleanup_debounce() -> Duration {
        Duration::from_millis(10)
    }

    const fn default_cleanup_interval() -> Duration {
        Duration::from_secs(10)
    }

    /// Create a configuration with a custom geohash precision.
    pub fn with_geohash_precision(precision: usize) -> Self {
        assert!(
            (1..=codec::MAX_PRECISION).contains(&precision),
            "Geohash precision must be between 1 and {}",
            codec::MAX_PRECISION
        );

        Self {
            geohash_precision: precision,
            ..Self::default()
        }
    }

    pub fn with_max_idle_ranges(mut self, max_idle_ranges: usize) -> Self {
        self.max_idle_ranges = max_idle_ranges;
        self
    }

    pub fn with_cleanup_debounce(mut self, debounce: Duration) -> Self {
        self.cleanup_debounce = debounce;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            geohash_precision: Self::default_geohash_precision(),
            max_idle_ranges: Self::default_max_idle_ranges(),
            cleanup_debounce: Self::default_cleanup_debounce(),
            cleanup_interval: Self::default_cleanup_interval(),
        }
    }
}

/// The circular region a [`crate::GeoQuery`] observes.
///
/// Construction requires both fields; updates merge, preserving any absent
/// field.
///
/// # Example
///
/// ```rust
/// use geoflux::{Point, QueryCriteria};
///
/// // Complete criteria for a new query: 100 km around Paris
/// let criteria = QueryCriteria::new(Point::new(2.3522, 48.8566), 100.0);
///
/// // Partial criteria for an update: grow the radius, keep the center
/// let update = QueryCriteria::with_radius_km(250.0);
/// assert!(update.center.is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryCriteria {
    /// Center of the circle (x = longitude, y = latitude)
    #[serde(default)]
    pub center: Option<Point<f64>>,
    /// Radius in kilometers, finite and positive
    #[serde(default)]
    pub radius_km: Option<f64>,
}

impl QueryCriteria {
    /// Complete criteria with both center and radius.
    pub fn new(center: Point<f64>, radius_km: f64) -> Self {
        Self {
            center: Some(center),
            radius_km: Some(radius_km),
        }
    }

    /// Partial criteria carrying only a new center.
    pub fn with_center(center: Point<f64>) -> Self {
        Self {
            center: Some(center),
            radius_km: None,
        }
    }

    /// Partial criteria carrying only a new radius.
    pub fn with_radius_km(radius_km: f64) -> Self {
        Self {
            center: None,
            radius_km: Some(radius_km),
        }
    }

    pub(crate) fn required(&self) -> crate::error::Result<(Point<f64>, f64)> {
        match (self.center, self.radius_km) {
            (Some(center), Some(radius_km)) => Ok((center, radius_km)),
            _ => Err(crate::error::GeoFluxError::InvalidCriteria(
                "both center and radius are required".to_string(),
            )),
        }
    }
}
