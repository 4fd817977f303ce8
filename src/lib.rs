//! GeoFlux - realtime geospatial radius queries over a live key-value store
//!
//! GeoFlux maps short string keys to points on Earth and lets clients watch
//! a moving circular region, receiving a continuous stream of membership
//! events as points are written, moved, or removed anywhere in the
//! underlying realtime store:
//!
//! - `key_entered` / `key_exited` / `key_moved` fire exactly once per
//!   logical transition, no matter how the watched geohash ranges overlap
//!   or churn
//! - `ready` fires once the initial data for the current criteria has been
//!   fully delivered, and again after every criteria update
//! - queries can be re-centered and resized on the fly without dropping or
//!   double-firing events
//!
//! The datastore sits behind the [`RealtimeStore`] trait; the bundled
//! [`MemoryStore`] is a synchronous in-process implementation.
//!
//! ```rust
//! use geoflux::{GeoFlux, MemoryStore, Point, QueryCriteria, QueryEvent, QueryEventKind};
//!
//! # fn main() -> geoflux::Result<()> {
//! let geo = GeoFlux::new(MemoryStore::new());
//! geo.set("rider-42", Point::new(-74.0060, 40.7128))?;
//!
//! // Watch 10 km around lower Manhattan
//! let query = geo.query(QueryCriteria::new(Point::new(-73.98, 40.71), 10.0))?;
//! let registration = query.on(QueryEventKind::KeyEntered, |event| {
//!     if let QueryEvent::KeyEntered { key, distance_km, .. } = event {
//!         println!("{key} is {distance_km:.1} km away");
//!     }
//! });
//!
//! query.update_criteria(QueryCriteria::with_radius_km(25.0))?;
//! registration.cancel();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod covering;
pub mod db;
pub mod error;
pub mod geometry;
pub mod query;
pub mod store;
pub mod types;
pub mod validation;

pub use covering::GeohashRange;
pub use db::GeoFlux;
pub use error::{GeoFluxError, Result};
pub use query::{CallbackRegistration, GeoQuery, QueryEvent, QueryEventKind};
pub use store::{EventHandle, MemoryStore, RealtimeStore};
pub use types::{Config, QueryCriteria, Record};

pub use geo::Point;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoFlux, GeoFluxError, Result};

    pub use crate::{GeoQuery, QueryCriteria, QueryEvent, QueryEventKind};

    pub use crate::{Config, MemoryStore, RealtimeStore, Record};

    pub use geo::Point;
}
