//! Geohash range covering for circular regions.
//!
//! Turns a (center, radius) circle into a small set of lexicographic
//! `[start, end]` prefix ranges over the geohash ordering, suitable for the
//! datastore's ordered-child range subscriptions. The covering is allowed
//! to be loose (the membership tracker rejects false positives against the
//! exact circle) but must never miss a point inside the circle.

use crate::codec::{self, BITS_PER_CHAR};
use crate::error::Result;
use crate::geometry;
use geo::Point;
use std::fmt;

/// Upper-bound sentinel, lexicographically greater than every base-32
/// geohash character.
pub const RANGE_SENTINEL: char = '~';

/// An inclusive lexicographic range of geohash strings.
///
/// A record matches when its geohash sorts within `[start, end]`. The `end`
/// bound carries the [`RANGE_SENTINEL`] so that every string extending the
/// end prefix is captured.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeohashRange {
    pub start: String,
    pub end: String,
}

impl GeohashRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whether a geohash sorts within this range.
    pub fn contains(&self, geohash: &str) -> bool {
        self.start.as_str() <= geohash && geohash <= self.end.as_str()
    }
}

impl fmt::Display for GeohashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Plan the set of geohash ranges covering a circle.
///
/// Every point within `radius_m` of `center` encodes (at any precision at
/// least the plan's prefix length) into one of the returned ranges. The
/// ranges are deduplicated and returned in discovery order.
///
/// # Examples
///
/// ```
/// use geoflux::covering::ranges_for_circle;
/// use geoflux::codec::encode;
/// use geo::Point;
///
/// let center = Point::new(2.3522, 48.8566);
/// let ranges = ranges_for_circle(center, 10_000.0, 10).unwrap();
/// let hash = encode(center, 10).unwrap();
/// assert!(ranges.iter().any(|r| r.contains(&hash)));
/// ```
pub fn ranges_for_circle(
    center: Point<f64>,
    radius_m: f64,
    precision: usize,
) -> Result<Vec<GeohashRange>> {
    let bits = geometry::bits_for_bounding_box(center, radius_m, precision);
    let chars = bits.div_ceil(BITS_PER_CHAR);

    let mut ranges: Vec<GeohashRange> = Vec::new();
    for coordinate in geometry::bounding_box_coordinates(center, radius_m) {
        let prefix = codec::encode(coordinate, chars)?;
        let range = range_for_prefix(&prefix, bits);
        if !ranges.contains(&range) {
            ranges.push(range);
        }
    }

    Ok(ranges)
}

/// Widen a prefix to the cell block addressed by its leading `bits` bits.
///
/// The last character of the prefix carries `bits mod 5` significant bits;
/// masking the rest aligns the range to the block boundary, merging the
/// adjacent sibling cells the box may spill into.
fn range_for_prefix(prefix: &str, bits: usize) -> GeohashRange {
    debug_assert!(!prefix.is_empty());
    let base = &prefix[..prefix.len() - 1];
    let last = prefix[base.len()..].chars().next().unwrap_or('0');
    let last_value = codec::base32_index(last).unwrap_or(0);

    let significant_bits = bits - base.len() * BITS_PER_CHAR;
    let unused_bits = BITS_PER_CHAR - significant_bits;
    let start_value = (last_value >> unused_bits) << unused_bits;
    let end_value = start_value + (1 << unused_bits);

    let start = format!("{}{}", base, codec::base32_char(start_value));
    let end = if end_value > 31 {
        format!("{}{}", base, RANGE_SENTINEL)
    } else {
        format!("{}{}{}", base, codec::base32_char(end_value - 1), RANGE_SENTINEL)
    };

    GeohashRange::new(start, end)
}
