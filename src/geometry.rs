//! Spherical geometry helpers for range planning and membership tests.
//!
//! All conversions live on the same sphere of radius 6371 km the distance
//! function uses, so a planned bounding box is never narrower than the
//! circle the membership tracker tests against.

use crate::codec::BITS_PER_CHAR;
use geo::Point;

/// Mean Earth radius used for great-circle distances, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Length of a meridian circle, in meters.
const EARTH_MERI_CIRCUMFERENCE_M: f64 = 40_007_860.0;

/// Meters in one degree of latitude. Slightly under the spherical value,
/// so latitude extensions overshoot rather than undershoot.
const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;

const EPSILON: f64 = 1e-12;

/// Great-circle distance between two points, in kilometers.
///
/// Haversine formula; symmetric, and zero exactly when the coordinates
/// name the same point after longitude wrapping.
///
/// # Examples
///
/// ```
/// use geoflux::geometry::distance_km;
/// use geo::Point;
///
/// let nyc = Point::new(-74.0060, 40.7128);
/// let london = Point::new(-0.1278, 51.5074);
/// let d = distance_km(nyc, london);
/// assert!((d - 5570.0).abs() < 20.0);
/// ```
pub fn distance_km(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat_a = a.y().to_radians();
    let lat_b = b.y().to_radians();
    let delta_lat = (b.y() - a.y()).to_radians();
    let delta_lon = (b.x() - a.x()).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Reduce a longitude into [-180, 180]; exactly ±180 stays as given.
pub fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

/// Degrees of longitude spanned by `distance_m` meters at a given latitude.
///
/// Near the poles the parallel degenerates and the result clamps to a full
/// 360 degrees.
pub fn meters_to_longitude_degrees(distance_m: f64, latitude: f64) -> f64 {
    let meters_per_degree =
        latitude.to_radians().cos() * EARTH_RADIUS_KM * 1000.0 * std::f64::consts::PI / 180.0;
    if meters_per_degree < EPSILON {
        if distance_m > 0.0 { 360.0 } else { 0.0 }
    } else {
        (distance_m / meters_per_degree).min(360.0)
    }
}

/// Geohash bits needed so one cell's latitude span is at least `resolution_m`.
fn latitude_bits_for_resolution(resolution_m: f64, max_bits: f64) -> f64 {
    (EARTH_MERI_CIRCUMFERENCE_M / 2.0 / resolution_m)
        .log2()
        .min(max_bits)
}

/// Geohash bits needed so one cell's longitude span at `latitude` is at
/// least `resolution_m`.
fn longitude_bits_for_resolution(resolution_m: f64, latitude: f64) -> f64 {
    let degrees = meters_to_longitude_degrees(resolution_m, latitude);
    if degrees.abs() > 1e-6 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        1.0
    }
}

/// Leading geohash bits such that a single cell is no smaller than the
/// bounding box of the circle along each axis.
///
/// Clamped to `[1, 5 * precision]`. The planner derives its prefix length
/// from this value, so encoding the box's extreme points is guaranteed to
/// cover every cell the box touches.
pub fn bits_for_bounding_box(center: Point<f64>, radius_m: f64, precision: usize) -> usize {
    let max_bits = (precision * BITS_PER_CHAR) as f64;
    let lat_delta = radius_m / METERS_PER_DEGREE_LATITUDE;
    let latitude_north = (center.y() + lat_delta).min(90.0);
    let latitude_south = (center.y() - lat_delta).max(-90.0);

    let bits_lat = latitude_bits_for_resolution(radius_m, max_bits).floor() * 2.0;
    let bits_lon_north = longitude_bits_for_resolution(radius_m, latitude_north).floor() * 2.0 - 1.0;
    let bits_lon_south = longitude_bits_for_resolution(radius_m, latitude_south).floor() * 2.0 - 1.0;

    bits_lat
        .min(bits_lon_north)
        .min(bits_lon_south)
        .min(max_bits)
        .max(1.0) as usize
}

/// The center and the eight surrounding extreme points of the axis-aligned
/// bounding box of a circle, longitudes wrapped.
pub fn bounding_box_coordinates(center: Point<f64>, radius_m: f64) -> Vec<Point<f64>> {
    let lat_degrees = radius_m / METERS_PER_DEGREE_LATITUDE;
    let latitude_north = (center.y() + lat_degrees).min(90.0);
    let latitude_south = (center.y() - lat_degrees).max(-90.0);
    let lon_degrees_north = meters_to_longitude_degrees(radius_m, latitude_north);
    let lon_degrees_south = meters_to_longitude_degrees(radius_m, latitude_south);
    let lon_degrees = lon_degrees_north.max(lon_degrees_south);

    let west = wrap_longitude(center.x() - lon_degrees);
    let east = wrap_longitude(center.x() + lon_degrees);

    let mut coordinates = vec![
        Point::new(center.x(), center.y()),
        Point::new(west, center.y()),
        Point::new(east, center.y()),
        Point::new(center.x(), latitude_north),
        Point::new(west, latitude_north),
        Point::new(east, latitude_north),
        Point::new(center.x(), latitude_south),
        Point::new(west, latitude_south),
        Point::new(east, latitude_south),
    ];

    // Near a pole the east/west extension exceeds half the parallel and the
    // box wraps all the way around; west and east collapse onto the center
    // meridian, so the far side must be sampled explicitly.
    if lon_degrees >= 180.0 {
        for latitude in [center.y(), latitude_north, latitude_south] {
            for offset in [90.0, 180.0, -90.0] {
                coordinates.push(Point::new(wrap_longitude(center.x() + offset), latitude));
            }
        }
    }

    coordinates
}
