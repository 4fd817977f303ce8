//! The GeoFlux façade: validated point writes and query construction.

use crate::codec;
use crate::error::Result;
use crate::query::GeoQuery;
use crate::store::RealtimeStore;
use crate::types::{Config, QueryCriteria};
use crate::validation;
use geo::Point;
use std::rc::Rc;

/// Entry point for writing points and opening live queries.
///
/// A `GeoFlux` wraps a shared [`RealtimeStore`] handle; every write stores
/// the location together with its geohash atomically, which is what the
/// queries' range subscriptions index on. The interesting state lives in
/// the queries; the façade itself is stateless beyond its configuration.
///
/// # Examples
///
/// ```rust
/// use geoflux::{GeoFlux, MemoryStore, Point, QueryCriteria};
///
/// # fn main() -> geoflux::Result<()> {
/// let geo = GeoFlux::new(MemoryStore::new());
///
/// geo.set("ferry-3", Point::new(11.97, 57.70))?;
/// assert_eq!(geo.get("ferry-3")?, Some(Point::new(11.97, 57.70)));
///
/// let query = geo.query(QueryCriteria::new(Point::new(12.0, 57.7), 25.0))?;
/// assert_eq!(query.radius_km(), 25.0);
///
/// geo.remove("ferry-3")?;
/// assert_eq!(geo.get("ferry-3")?, None);
/// # Ok(())
/// # }
/// ```
pub struct GeoFlux {
    store: Rc<dyn RealtimeStore>,
    config: Config,
}

impl GeoFlux {
    /// Create a GeoFlux over a store with the default configuration.
    pub fn new(store: impl RealtimeStore + 'static) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Create a GeoFlux with a custom configuration.
    pub fn with_config(store: impl RealtimeStore + 'static, config: Config) -> Self {
        Self {
            store: Rc::new(store),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store or move the point for a key.
    pub fn set(&self, key: &str, location: Point<f64>) -> Result<()> {
        validation::validate_key(key)?;
        validation::validate_location(&location)?;
        let geohash = codec::encode(location, self.config.geohash_precision)?;
        self.store.write(key, &geohash, location);
        Ok(())
    }

    /// Current location of a key, if stored.
    pub fn get(&self, key: &str) -> Result<Option<Point<f64>>> {
        validation::validate_key(key)?;
        Ok(self.store.read(key).map(|record| record.location))
    }

    /// Delete a key's point. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) -> Result<()> {
        validation::validate_key(key)?;
        self.store.remove(key);
        Ok(())
    }

    /// Open a live query over a circular region.
    ///
    /// The criteria must be complete (center and radius).
    pub fn query(&self, criteria: QueryCriteria) -> Result<GeoQuery> {
        GeoQuery::new(self.store.clone(), self.config.clone(), criteria)
    }
}
