//! Per-key membership state for a live query.

use crate::error::{GeoFluxError, Result};
use crate::geometry;
use geo::Point;
use rustc_hash::FxHashMap;

/// Cached state for one key observed by a query's range subscriptions.
#[derive(Debug, Clone)]
pub(crate) struct TrackedLocation {
    pub location: Point<f64>,
    pub distance_km: f64,
    pub is_in_query: bool,
    pub geohash: String,
}

/// A membership transition for one key, produced by reconciling a single
/// store event (or a criteria change) against the circle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    Entered {
        key: String,
        location: Point<f64>,
        distance_km: f64,
    },
    Moved {
        key: String,
        location: Point<f64>,
        distance_km: f64,
    },
    Exited {
        key: String,
        location: Option<Point<f64>>,
        distance_km: Option<f64>,
    },
}

/// Tracks every key currently observed by the query's active ranges and
/// decides which transition, if any, each incoming event represents.
///
/// At most one transition is produced per input event per key, and for any
/// key the produced sequence alternates entered / exited with moves only
/// between an enter and the following exit.
#[derive(Default)]
pub(crate) struct MembershipTracker {
    entries: FxHashMap<String, TrackedLocation>,
}

impl MembershipTracker {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Absorb an added/changed record and report the resulting transition.
    ///
    /// Idempotent under re-delivery: replaying an unchanged record computes
    /// the same state and reports nothing.
    pub fn update(
        &mut self,
        key: &str,
        location: Point<f64>,
        geohash: String,
        center: Point<f64>,
        radius_km: f64,
    ) -> Option<Transition> {
        let distance_km = geometry::distance_km(location, center);
        let is_in_query = distance_km <= radius_km;

        let previous = self.entries.insert(
            key.to_string(),
            TrackedLocation {
                location,
                distance_km,
                is_in_query,
                geohash,
            },
        );
        let was_in_query = previous.as_ref().is_some_and(|e| e.is_in_query);
        let location_changed = previous.as_ref().is_some_and(|e| e.location != location);

        if is_in_query && !was_in_query {
            Some(Transition::Entered {
                key: key.to_string(),
                location,
                distance_km,
            })
        } else if is_in_query && was_in_query && location_changed {
            Some(Transition::Moved {
                key: key.to_string(),
                location,
                distance_km,
            })
        } else if !is_in_query && was_in_query {
            Some(Transition::Exited {
                key: key.to_string(),
                location: Some(location),
                distance_km: Some(distance_km),
            })
        } else {
            None
        }
    }

    /// Drop a key that left every range this query watches.
    ///
    /// `current_location` is the key's location if it still exists anywhere
    /// in the store, `None` for a true deletion.
    pub fn remove(
        &mut self,
        key: &str,
        current_location: Option<Point<f64>>,
        center: Point<f64>,
    ) -> Option<Transition> {
        let entry = self.entries.remove(key)?;
        if !entry.is_in_query {
            return None;
        }
        Some(Transition::Exited {
            key: key.to_string(),
            location: current_location,
            distance_km: current_location.map(|location| geometry::distance_km(location, center)),
        })
    }

    /// Re-derive membership for every tracked key after a criteria change.
    ///
    /// Locations have not changed, only the circle, so this yields entered
    /// and exited transitions but never moved.
    pub fn recompute_all(&mut self, center: Point<f64>, radius_km: f64) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            let distance_km = geometry::distance_km(entry.location, center);
            let is_in_query = distance_km <= radius_km;
            let was_in_query = entry.is_in_query;
            entry.distance_km = distance_km;
            entry.is_in_query = is_in_query;

            if is_in_query && !was_in_query {
                transitions.push(Transition::Entered {
                    key: key.clone(),
                    location: entry.location,
                    distance_km,
                });
            } else if !is_in_query && was_in_query {
                transitions.push(Transition::Exited {
                    key: key.clone(),
                    location: Some(entry.location),
                    distance_km: Some(distance_km),
                });
            }
        }
        transitions
    }

    /// Snapshot of every key currently inside the circle, for replaying
    /// `key_entered` to a freshly registered callback.
    pub fn inside_snapshot(&self) -> Vec<(String, Point<f64>, f64)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_in_query)
            .map(|(key, entry)| (key.clone(), entry.location, entry.distance_km))
            .collect()
    }

    /// Drop entries whose geohash no longer falls in any watched range,
    /// returning how many were dropped.
    ///
    /// An entry still marked inside the query must, by invariant, be inside
    /// some range; finding one is an engine bug, reported as
    /// [`GeoFluxError::InternalState`] with nothing dropped.
    pub fn garbage_collect(&mut self, in_some_range: impl Fn(&str) -> bool) -> Result<usize> {
        for (key, entry) in self.entries.iter() {
            if entry.is_in_query && !in_some_range(&entry.geohash) {
                return Err(GeoFluxError::InternalState(format!(
                    "tracked key {key} is inside the query but outside every range"
                )));
            }
        }

        let before = self.entries.len();
        self.entries
            .retain(|_, entry| in_some_range(&entry.geohash));
        Ok(before - self.entries.len())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
