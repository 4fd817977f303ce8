//! In-memory realtime store.

use super::{EventHandle, RealtimeStore, RecordCallback, ValueCallback};
use crate::types::Record;
use geo::Point;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// In-memory [`RealtimeStore`] with synchronous event dispatch.
///
/// Cloning is cheap and clones share the same underlying records and
/// subscriptions, so a writer handle and the handles held by live queries
/// observe one store. Like the rest of the crate it is single-threaded;
/// callbacks run on the calling thread before the mutating call returns.
///
/// Dispatch is re-entrancy safe: internal borrows are released before any
/// callback is invoked, so a callback may freely read, write, subscribe, or
/// detach.
///
/// # Examples
///
/// ```rust
/// use geoflux::{MemoryStore, RealtimeStore};
/// use geo::Point;
///
/// let store = MemoryStore::new();
/// store.write("museum", "u09tunqu8c", Point::new(2.3376, 48.8606));
/// assert!(store.read("museum").is_some());
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    records: BTreeMap<String, StoredPoint>,
    subscriptions: Vec<Subscription>,
    next_handle: u64,
}

#[derive(Clone, PartialEq)]
struct StoredPoint {
    geohash: String,
    location: Point<f64>,
}

struct Subscription {
    handle: EventHandle,
    start: String,
    end: String,
    listener: Listener,
}

enum Listener {
    Added(Rc<RefCell<RecordCallback>>),
    Changed(Rc<RefCell<RecordCallback>>),
    Removed(Rc<RefCell<RecordCallback>>),
    Value(Rc<RefCell<ValueCallback>>),
}

/// A callback invocation collected under the store borrow and dispatched
/// after it is released.
enum Pending {
    Child(Rc<RefCell<RecordCallback>>, Record),
    Value(Rc<RefCell<ValueCallback>>),
}

fn in_range(start: &str, end: &str, geohash: &str) -> bool {
    start <= geohash && geohash <= end
}

fn invoke_record(slot: &Rc<RefCell<RecordCallback>>, record: &Record) {
    if let Ok(mut callback) = slot.try_borrow_mut() {
        (*callback)(record);
    }
}

fn invoke_value(slot: &Rc<RefCell<ValueCallback>>) {
    if let Ok(mut callback) = slot.try_borrow_mut() {
        (*callback)();
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.inner.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().records.is_empty()
    }

    fn register(&self, start: &str, end: &str, listener: Listener) -> EventHandle {
        let mut inner = self.inner.borrow_mut();
        let handle = EventHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.subscriptions.push(Subscription {
            handle,
            start: start.to_string(),
            end: end.to_string(),
            listener,
        });
        handle
    }
}

impl RealtimeStore for MemoryStore {
    fn on_child_added(&self, start: &str, end: &str, callback: RecordCallback) -> EventHandle {
        let slot = Rc::new(RefCell::new(callback));

        let backlog: Vec<Record> = {
            let inner = self.inner.borrow();
            let mut matching: Vec<Record> = inner
                .records
                .iter()
                .filter(|(_, point)| in_range(start, end, &point.geohash))
                .map(|(key, point)| Record {
                    key: key.clone(),
                    geohash: point.geohash.clone(),
                    location: point.location,
                })
                .collect();
            matching.sort_by(|a, b| (&a.geohash, &a.key).cmp(&(&b.geohash, &b.key)));
            matching
        };

        let handle = self.register(start, end, Listener::Added(slot.clone()));
        for record in &backlog {
            invoke_record(&slot, record);
        }
        handle
    }

    fn on_child_changed(&self, start: &str, end: &str, callback: RecordCallback) -> EventHandle {
        self.register(start, end, Listener::Changed(Rc::new(RefCell::new(callback))))
    }

    fn on_child_removed(&self, start: &str, end: &str, callback: RecordCallback) -> EventHandle {
        self.register(start, end, Listener::Removed(Rc::new(RefCell::new(callback))))
    }

    fn on_value(&self, start: &str, end: &str, callback: ValueCallback) -> EventHandle {
        let slot = Rc::new(RefCell::new(callback));
        let handle = self.register(start, end, Listener::Value(slot.clone()));
        // The backlog is delivered synchronously by on_child_added, so by
        // registration time the initial load is already complete.
        invoke_value(&slot);
        handle
    }

    fn off(&self, handle: EventHandle) {
        self.inner
            .borrow_mut()
            .subscriptions
            .retain(|sub| sub.handle != handle);
    }

    fn read(&self, key: &str) -> Option<Record> {
        let inner = self.inner.borrow();
        inner.records.get(key).map(|point| Record {
            key: key.to_string(),
            geohash: point.geohash.clone(),
            location: point.location,
        })
    }

    fn write(&self, key: &str, geohash: &str, location: Point<f64>) {
        let pending: Vec<Pending> = {
            let mut inner = self.inner.borrow_mut();
            let new_point = StoredPoint {
                geohash: geohash.to_string(),
                location,
            };
            let old_point = inner.records.insert(key.to_string(), new_point);
            if old_point.as_ref().is_some_and(|old| {
                old.geohash == geohash && old.location == location
            }) {
                return;
            }

            let new_record = Record {
                key: key.to_string(),
                geohash: geohash.to_string(),
                location,
            };
            let old_record = old_point.map(|old| Record {
                key: key.to_string(),
                geohash: old.geohash,
                location: old.location,
            });

            let mut child_events = Vec::new();
            let mut value_events = Vec::new();
            for sub in &inner.subscriptions {
                let old_in = old_record
                    .as_ref()
                    .is_some_and(|r| in_range(&sub.start, &sub.end, &r.geohash));
                let new_in = in_range(&sub.start, &sub.end, geohash);
                match &sub.listener {
                    Listener::Added(slot) if !old_in && new_in => {
                        child_events.push(Pending::Child(slot.clone(), new_record.clone()));
                    }
                    Listener::Changed(slot) if old_in && new_in => {
                        child_events.push(Pending::Child(slot.clone(), new_record.clone()));
                    }
                    Listener::Removed(slot) if old_in && !new_in => {
                        if let Some(old_record) = &old_record {
                            child_events.push(Pending::Child(slot.clone(), old_record.clone()));
                        }
                    }
                    Listener::Value(slot) if old_in || new_in => {
                        value_events.push(Pending::Value(slot.clone()));
                    }
                    _ => {}
                }
            }
            child_events.extend(value_events);
            child_events
        };

        for event in pending {
            match event {
                Pending::Child(slot, record) => invoke_record(&slot, &record),
                Pending::Value(slot) => invoke_value(&slot),
            }
        }
    }

    fn remove(&self, key: &str) {
        let pending: Vec<Pending> = {
            let mut inner = self.inner.borrow_mut();
            let Some(old_point) = inner.records.remove(key) else {
                return;
            };
            let old_record = Record {
                key: key.to_string(),
                geohash: old_point.geohash,
                location: old_point.location,
            };

            let mut child_events = Vec::new();
            let mut value_events = Vec::new();
            for sub in &inner.subscriptions {
                if !in_range(&sub.start, &sub.end, &old_record.geohash) {
                    continue;
                }
                match &sub.listener {
                    Listener::Removed(slot) => {
                        child_events.push(Pending::Child(slot.clone(), old_record.clone()));
                    }
                    Listener::Value(slot) => {
                        value_events.push(Pending::Value(slot.clone()));
                    }
                    _ => {}
                }
            }
            child_events.extend(value_events);
            child_events
        };

        for event in pending {
            match event {
                Pending::Child(slot, record) => invoke_record(&slot, &record),
                Pending::Value(slot) => invoke_value(&slot),
            }
        }
    }
}
