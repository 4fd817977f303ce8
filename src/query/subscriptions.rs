//! Active range-subscription bookkeeping with deferred teardown.

use crate::covering::GeohashRange;
use crate::store::{EventHandle, RealtimeStore};
use crate::types::Config;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// The four store handles backing one watched range.
pub(crate) struct RangeHandles {
    pub added: EventHandle,
    pub changed: EventHandle,
    pub removed: EventHandle,
    pub value: EventHandle,
}

struct RangeSubscription {
    active: bool,
    handles: Option<RangeHandles>,
}

/// The set of ranges a query currently watches on the store.
///
/// Ranges leaving the plan are only marked inactive; teardown is deferred
/// behind a debounce (once the set grows past `max_idle_ranges`) and a
/// periodic sweep, so a query panning back and forth does not thrash its
/// store subscriptions. The single-threaded engine has no timer thread;
/// both timers are deadlines evaluated on event delivery.
pub(crate) struct RangeSubscriptions {
    entries: BTreeMap<GeohashRange, RangeSubscription>,
    max_idle_ranges: usize,
    debounce: Duration,
    interval: Duration,
    debounce_deadline: Option<Instant>,
    next_sweep: Instant,
}

impl RangeSubscriptions {
    pub fn new(config: &Config) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_idle_ranges: config.max_idle_ranges,
            debounce: config.cleanup_debounce,
            interval: config.cleanup_interval,
            debounce_deadline: None,
            next_sweep: Instant::now() + config.cleanup_interval,
        }
    }

    /// Whether a geohash falls in any currently watched range, active or
    /// awaiting teardown.
    pub fn contains_hash(&self, geohash: &str) -> bool {
        self.entries.keys().any(|range| range.contains(geohash))
    }

    /// Diff the watched set against a new plan.
    ///
    /// Ranges missing from the plan are marked inactive, ranges already
    /// watched are reactivated without reopening, and the ranges the caller
    /// must open subscriptions for are returned.
    pub fn reconcile(&mut self, targets: &[GeohashRange]) -> Vec<GeohashRange> {
        for (range, subscription) in self.entries.iter_mut() {
            subscription.active = targets.contains(range);
        }

        let mut opened = Vec::new();
        for range in targets {
            if !self.entries.contains_key(range) {
                self.entries.insert(
                    range.clone(),
                    RangeSubscription {
                        active: true,
                        handles: None,
                    },
                );
                opened.push(range.clone());
            }
        }

        log::debug!(
            "reconciled ranges: {} target, {} watched, {} to open",
            targets.len(),
            self.entries.len(),
            opened.len()
        );
        opened
    }

    /// Attach the store handles for a range opened after [`Self::reconcile`].
    pub fn attach(&mut self, range: &GeohashRange, handles: RangeHandles) {
        if let Some(subscription) = self.entries.get_mut(range) {
            subscription.handles = Some(handles);
        }
    }

    /// Schedule the debounced teardown if the watched set grew too large.
    pub fn schedule_if_crowded(&mut self, now: Instant) {
        if self.entries.len() > self.max_idle_ranges && self.debounce_deadline.is_none() {
            self.debounce_deadline = Some(now + self.debounce);
        }
    }

    pub fn cleanup_due(&self, now: Instant) -> bool {
        self.debounce_deadline.is_some_and(|deadline| now >= deadline) || now >= self.next_sweep
    }

    /// Tear down every inactive range, detaching its store handles.
    pub fn run_cleanup(&mut self, store: &dyn RealtimeStore, now: Instant) {
        self.debounce_deadline = None;
        self.next_sweep = now + self.interval;

        let stale: Vec<GeohashRange> = self
            .entries
            .iter()
            .filter(|(_, subscription)| !subscription.active)
            .map(|(range, _)| range.clone())
            .collect();

        for range in &stale {
            if let Some(subscription) = self.entries.remove(range)
                && let Some(handles) = subscription.handles
            {
                detach(store, handles);
            }
        }

        if !stale.is_empty() {
            log::debug!("tore down {} idle range subscriptions", stale.len());
        }
    }

    /// Detach everything and clear the schedule. Idempotent.
    pub fn cancel_all(&mut self, store: &dyn RealtimeStore) {
        for (_, subscription) in std::mem::take(&mut self.entries) {
            if let Some(handles) = subscription.handles {
                detach(store, handles);
            }
        }
        self.debounce_deadline = None;
    }
}

fn detach(store: &dyn RealtimeStore, handles: RangeHandles) {
    store.off(handles.added);
    store.off(handles.changed);
    store.off(handles.removed);
    store.off(handles.value);
}
