//! Validation for keys, geographic coordinates, geohashes, and criteria.

use crate::codec;
use crate::error::{GeoFluxError, Result};
use crate::types::QueryCriteria;
use geo::Point;

/// Maximum key length in bytes accepted by the datastore.
pub const MAX_KEY_BYTES: usize = 768;

/// Characters the datastore reserves for its path syntax.
const RESERVED_KEY_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// Validates a point has valid longitude and latitude.
///
/// Longitude: [-180.0, 180.0], Latitude: [-90.0, 90.0]
///
/// # Examples
///
/// ```
/// use geoflux::validation::validate_location;
/// use geo::Point;
///
/// // Valid point
/// let nyc = Point::new(-74.0060, 40.7128);
/// assert!(validate_location(&nyc).is_ok());
///
/// // Invalid longitude
/// let invalid = Point::new(200.0, 40.0);
/// assert!(validate_location(&invalid).is_err());
///
/// // Invalid latitude
/// let invalid = Point::new(-74.0, 95.0);
/// assert!(validate_location(&invalid).is_err());
/// ```
pub fn validate_location(point: &Point<f64>) -> Result<()> {
    let (x, y) = (point.x(), point.y());

    if !x.is_finite() {
        return Err(GeoFluxError::InvalidLocation(format!(
            "Longitude must be finite, got: {}",
            x
        )));
    }

    if !y.is_finite() {
        return Err(GeoFluxError::InvalidLocation(format!(
            "Latitude must be finite, got: {}",
            y
        )));
    }

    if !(-180.0..=180.0).contains(&x) {
        return Err(GeoFluxError::InvalidLocation(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            x
        )));
    }

    if !(-90.0..=90.0).contains(&y) {
        return Err(GeoFluxError::InvalidLocation(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            y
        )));
    }

    Ok(())
}

/// Validates a key is storable: non-empty, at most [`MAX_KEY_BYTES`] bytes,
/// printable, and free of the datastore's reserved characters.
///
/// # Examples
///
/// ```
/// use geoflux::validation::validate_key;
///
/// assert!(validate_key("rider-42").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("a/b").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GeoFluxError::InvalidKey("key must not be empty".to_string()));
    }

    if key.len() > MAX_KEY_BYTES {
        return Err(GeoFluxError::InvalidKey(format!(
            "key exceeds {} bytes: {}",
            MAX_KEY_BYTES,
            key.len()
        )));
    }

    for c in key.chars() {
        if c.is_control() {
            return Err(GeoFluxError::InvalidKey(format!(
                "key contains control character {:?}",
                c
            )));
        }
        if RESERVED_KEY_CHARS.contains(&c) {
            return Err(GeoFluxError::InvalidKey(format!(
                "key contains reserved character {:?}",
                c
            )));
        }
    }

    Ok(())
}

/// Validates a geohash string against the base-32 alphabet.
pub fn validate_geohash(geohash: &str) -> Result<()> {
    if geohash.is_empty() {
        return Err(GeoFluxError::InvalidGeohash(
            "geohash must not be empty".to_string(),
        ));
    }

    for c in geohash.chars() {
        if !codec::BASE32.contains(c) {
            return Err(GeoFluxError::InvalidGeohash(format!(
                "character {:?} is not in the geohash alphabet",
                c
            )));
        }
    }

    Ok(())
}

/// Validates query criteria.
///
/// With `require_complete` (query construction) both fields must be present;
/// without it (criteria updates) any non-empty subset is accepted. Present
/// fields are always range-checked.
pub fn validate_criteria(criteria: &QueryCriteria, require_complete: bool) -> Result<()> {
    if criteria.center.is_none() && criteria.radius_km.is_none() {
        return Err(GeoFluxError::InvalidCriteria(
            "criteria must specify a center or a radius".to_string(),
        ));
    }

    if require_complete && (criteria.center.is_none() || criteria.radius_km.is_none()) {
        return Err(GeoFluxError::InvalidCriteria(
            "both center and radius are required".to_string(),
        ));
    }

    if let Some(center) = criteria.center {
        validate_location(&center)
            .map_err(|e| GeoFluxError::InvalidCriteria(format!("center: {}", e)))?;
    }

    if let Some(radius_km) = criteria.radius_km {
        if !radius_km.is_finite() {
            return Err(GeoFluxError::InvalidCriteria(format!(
                "radius must be finite, got: {}",
                radius_km
            )));
        }
        if radius_km <= 0.0 {
            return Err(GeoFluxError::InvalidCriteria(format!(
                "radius must be positive, got: {}",
                radius_km
            )));
        }
    }

    Ok(())
}
