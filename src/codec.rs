//! Geohash codec wrapper.
//!
//! Thin adapter over the `geohash` crate pinning down the contract the rest
//! of the engine relies on: base-32 prefixes of a fixed precision, encoded
//! from `geo::Point` values (x = longitude, y = latitude).

use crate::error::{GeoFluxError, Result};
use geo::{Point, Rect};

/// The geohash base-32 alphabet, in lexicographic order.
pub const BASE32: &str = "0123456789bcdefghjkmnpqrstuvwxyz";

/// Bits of spatial resolution carried by one geohash character.
pub const BITS_PER_CHAR: usize = 5;

/// Longest geohash the codec produces.
pub const MAX_PRECISION: usize = 12;

/// Encode a location as a geohash of exactly `precision` characters.
///
/// Deterministic; two locations in the same cell at a given precision
/// produce identical prefixes.
///
/// # Examples
///
/// ```
/// use geoflux::codec::encode;
/// use geo::Point;
///
/// let hash = encode(Point::new(10.40744, 57.64911), 10).unwrap();
/// assert_eq!(hash, "u4pruydqqv");
/// ```
pub fn encode(location: Point<f64>, precision: usize) -> Result<String> {
    geohash::encode(
        geohash::Coord {
            x: location.x(),
            y: location.y(),
        },
        precision,
    )
    .map_err(|e| GeoFluxError::InvalidGeohash(e.to_string()))
}

/// Bounding box of the cell named by a geohash prefix.
pub fn cell_bounds(prefix: &str) -> Result<Rect<f64>> {
    geohash::decode_bbox(prefix).map_err(|e| GeoFluxError::InvalidGeohash(e.to_string()))
}

/// Index of a character in the base-32 alphabet.
pub(crate) fn base32_index(c: char) -> Option<usize> {
    BASE32.find(c)
}

/// Character at an index of the base-32 alphabet.
///
/// Panics if `index` is out of the alphabet; callers mask values into 0..32.
pub(crate) fn base32_char(index: usize) -> char {
    BASE32.as_bytes()[index] as char
}
