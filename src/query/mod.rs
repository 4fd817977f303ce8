//! Live circular queries over a realtime store.
//!
//! A [`GeoQuery`] watches a circle and streams membership transitions to
//! registered callbacks as keys are written, moved, or removed anywhere in
//! the store. The heavy lifting is split across three collaborators: the
//! range planner ([`crate::covering`]) decides which geohash ranges to
//! watch, [`RangeSubscriptions`] keeps the store subscriptions in sync with
//! the plan, and the [`MembershipTracker`] turns raw child events into
//! exactly-once enter/move/exit transitions.

use crate::codec;
use crate::covering::{self, GeohashRange};
use crate::error::{GeoFluxError, Result};
use crate::store::RealtimeStore;
use crate::types::{Config, QueryCriteria, Record};
use crate::validation;
use geo::Point;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use std::time::Instant;

mod subscriptions;
mod tracker;

use subscriptions::{RangeHandles, RangeSubscriptions};
use tracker::{MembershipTracker, Transition};

/// The kinds of events a query emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryEventKind {
    /// Initial data for the current criteria has been fully delivered
    Ready,
    /// A key moved into the circle (or was first observed inside it)
    KeyEntered,
    /// A key left the circle or was deleted
    KeyExited,
    /// A key changed location while staying inside the circle
    KeyMoved,
}

/// An event delivered to a query callback.
///
/// `KeyExited` carries `None` payloads when the key was deleted outright
/// rather than moved away.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    Ready,
    KeyEntered {
        key: String,
        location: Point<f64>,
        distance_km: f64,
    },
    KeyExited {
        key: String,
        location: Option<Point<f64>>,
        distance_km: Option<f64>,
    },
    KeyMoved {
        key: String,
        location: Point<f64>,
        distance_km: f64,
    },
}

impl QueryEvent {
    pub fn kind(&self) -> QueryEventKind {
        match self {
            QueryEvent::Ready => QueryEventKind::Ready,
            QueryEvent::KeyEntered { .. } => QueryEventKind::KeyEntered,
            QueryEvent::KeyExited { .. } => QueryEventKind::KeyExited,
            QueryEvent::KeyMoved { .. } => QueryEventKind::KeyMoved,
        }
    }
}

type EventCallback = Box<dyn FnMut(&QueryEvent)>;

struct CallbackSlot {
    active: Cell<bool>,
    callback: RefCell<EventCallback>,
}

#[derive(Default)]
struct Listeners {
    ready: RefCell<Vec<Rc<CallbackSlot>>>,
    key_entered: RefCell<Vec<Rc<CallbackSlot>>>,
    key_exited: RefCell<Vec<Rc<CallbackSlot>>>,
    key_moved: RefCell<Vec<Rc<CallbackSlot>>>,
}

impl Listeners {
    fn list(&self, kind: QueryEventKind) -> &RefCell<Vec<Rc<CallbackSlot>>> {
        match kind {
            QueryEventKind::Ready => &self.ready,
            QueryEventKind::KeyEntered => &self.key_entered,
            QueryEventKind::KeyExited => &self.key_exited,
            QueryEventKind::KeyMoved => &self.key_moved,
        }
    }

    fn clear(&self) {
        for list in [&self.ready, &self.key_entered, &self.key_exited, &self.key_moved] {
            let mut list = list.borrow_mut();
            for slot in list.iter() {
                slot.active.set(false);
            }
            list.clear();
        }
    }
}

/// Token returned by [`GeoQuery::on`], cancelling one callback.
///
/// Dropping the registration does not cancel the callback; call
/// [`CallbackRegistration::cancel`]. Cancelling twice is a no-op.
pub struct CallbackRegistration {
    slot: Weak<CallbackSlot>,
}

impl CallbackRegistration {
    fn inert() -> Self {
        Self { slot: Weak::new() }
    }

    /// Remove this callback from its query. Idempotent.
    pub fn cancel(&self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.active.set(false);
        }
    }
}

struct QueryState {
    center: Point<f64>,
    radius_km: f64,
    tracker: MembershipTracker,
    subscriptions: RangeSubscriptions,
    outstanding_ready: BTreeSet<GeohashRange>,
}

struct QueryShared {
    store: Rc<dyn RealtimeStore>,
    config: Config,
    cancelled: Cell<bool>,
    value_event_fired: Cell<bool>,
    state: RefCell<QueryState>,
    listeners: Listeners,
}

/// A live query over a circular region of the store.
///
/// Created by [`crate::GeoFlux::query`]. Events are delivered synchronously
/// on the thread mutating the store; all callbacks of one query are
/// serialized and a callback may re-enter the query (including calling
/// [`GeoQuery::cancel`]).
///
/// Dropping the query cancels it.
///
/// # Examples
///
/// ```rust
/// use geoflux::{GeoFlux, MemoryStore, Point, QueryCriteria, QueryEvent, QueryEventKind};
///
/// # fn main() -> geoflux::Result<()> {
/// let store = MemoryStore::new();
/// let geo = GeoFlux::new(store);
/// geo.set("lighthouse", Point::new(-5.1, 48.4))?;
///
/// let query = geo.query(QueryCriteria::new(Point::new(-5.0, 48.5), 50.0))?;
/// let _entered = query.on(QueryEventKind::KeyEntered, |event| {
///     if let QueryEvent::KeyEntered { key, distance_km, .. } = event {
///         println!("{key} entered at {distance_km:.1} km");
///     }
/// });
/// let _ready = query.on(QueryEventKind::Ready, |_| println!("initial data complete"));
/// # Ok(())
/// # }
/// ```
pub struct GeoQuery {
    shared: Rc<QueryShared>,
}

impl GeoQuery {
    pub(crate) fn new(
        store: Rc<dyn RealtimeStore>,
        config: Config,
        criteria: QueryCriteria,
    ) -> Result<Self> {
        validation::validate_criteria(&criteria, true)?;
        let (center, radius_km) = criteria.required()?;

        let subscriptions = RangeSubscriptions::new(&config);
        let shared = Rc::new(QueryShared {
            store,
            config,
            cancelled: Cell::new(false),
            value_event_fired: Cell::new(false),
            state: RefCell::new(QueryState {
                center,
                radius_km,
                tracker: MembershipTracker::default(),
                subscriptions,
                outstanding_ready: BTreeSet::new(),
            }),
            listeners: Listeners::default(),
        });

        let query = GeoQuery { shared };
        reconcile(&query.shared)?;
        Ok(query)
    }

    /// Center of the watched circle.
    pub fn center(&self) -> Point<f64> {
        self.shared.state.borrow().center
    }

    /// Radius of the watched circle, in kilometers.
    pub fn radius_km(&self) -> f64 {
        self.shared.state.borrow().radius_km
    }

    /// Move and/or resize the circle without dropping events.
    ///
    /// Absent criteria fields are preserved. Membership of every tracked
    /// key is re-derived first, emitting `key_entered` / `key_exited` but
    /// never `key_moved` (no location changed), and then the range plan is
    /// recomputed and a fresh `ready` barrier armed. A callback that
    /// cancels the query mid-update aborts the remaining dispatch.
    pub fn update_criteria(&self, criteria: QueryCriteria) -> Result<()> {
        if self.shared.cancelled.get() {
            return Err(GeoFluxError::QueryCancelled);
        }
        validation::validate_criteria(&criteria, false)?;

        let transitions = {
            let mut state = self.shared.state.borrow_mut();
            if let Some(center) = criteria.center {
                state.center = center;
            }
            if let Some(radius_km) = criteria.radius_km {
                state.radius_km = radius_km;
            }
            let center = state.center;
            let radius_km = state.radius_km;
            state.tracker.recompute_all(center, radius_km)
        };

        for transition in transitions {
            if self.shared.cancelled.get() {
                return Ok(());
            }
            dispatch_transition(&self.shared, transition);
        }
        if self.shared.cancelled.get() {
            return Ok(());
        }

        self.shared.value_event_fired.set(false);
        reconcile(&self.shared)
    }

    /// Register a callback for one kind of event.
    ///
    /// `key_entered` callbacks are immediately replayed the current
    /// membership; a `ready` callback registered after the barrier has
    /// fired is invoked at once. After [`GeoQuery::cancel`] an inert
    /// registration is returned and the callback will never run.
    pub fn on(
        &self,
        kind: QueryEventKind,
        callback: impl FnMut(&QueryEvent) + 'static,
    ) -> CallbackRegistration {
        if self.shared.cancelled.get() {
            return CallbackRegistration::inert();
        }

        let slot = Rc::new(CallbackSlot {
            active: Cell::new(true),
            callback: RefCell::new(Box::new(callback)),
        });
        {
            let mut list = self.shared.listeners.list(kind).borrow_mut();
            list.retain(|existing| existing.active.get());
            list.push(slot.clone());
        }

        match kind {
            QueryEventKind::KeyEntered => replay_membership(&self.shared, &slot),
            QueryEventKind::Ready if self.shared.value_event_fired.get() => {
                invoke_slot(&slot, &QueryEvent::Ready);
            }
            _ => {}
        }

        CallbackRegistration {
            slot: Rc::downgrade(&slot),
        }
    }

    /// Cancel the query: detach every store subscription, drop all tracked
    /// state, and silence every callback. Terminal and idempotent; may be
    /// called from inside any of this query's callbacks.
    pub fn cancel(&self) {
        if self.shared.cancelled.replace(true) {
            return;
        }
        self.shared.listeners.clear();

        let mut state = self.shared.state.borrow_mut();
        let QueryState {
            subscriptions,
            tracker,
            outstanding_ready,
            ..
        } = &mut *state;
        subscriptions.cancel_all(self.shared.store.as_ref());
        tracker.clear();
        outstanding_ready.clear();
    }
}

impl Drop for GeoQuery {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Recompute the range plan and bring the store subscriptions in line.
///
/// Every newly planned range is added to the ready barrier before the first
/// subscription opens: the store delivers backlog and value events
/// synchronously, and the barrier must not complete while later ranges are
/// still unopened.
fn reconcile(shared: &Rc<QueryShared>) -> Result<()> {
    let opened = {
        let mut state = shared.state.borrow_mut();
        let center = state.center;
        let radius_km = state.radius_km;
        let targets = covering::ranges_for_circle(
            center,
            radius_km * 1000.0,
            shared.config.geohash_precision,
        )?;
        let opened = state.subscriptions.reconcile(&targets);
        state.outstanding_ready = opened.iter().cloned().collect();
        state.subscriptions.schedule_if_crowded(Instant::now());
        opened
    };

    for range in opened {
        if shared.cancelled.get() {
            return Ok(());
        }
        let handles = open_range(shared, &range);
        if shared.cancelled.get() {
            // cancel() already emptied the subscription map; these four
            // were opened after that and must be detached here.
            shared.store.off(handles.added);
            shared.store.off(handles.changed);
            shared.store.off(handles.removed);
            shared.store.off(handles.value);
            return Ok(());
        }
        shared.state.borrow_mut().subscriptions.attach(&range, handles);
    }

    // Nothing left outstanding (possibly because nothing was opened):
    // complete the barrier ourselves.
    if !shared.cancelled.get() && !shared.value_event_fired.get() {
        let idle = shared.state.borrow().outstanding_ready.is_empty();
        if idle {
            shared.value_event_fired.set(true);
            dispatch(shared, QueryEventKind::Ready, &QueryEvent::Ready);
        }
    }
    Ok(())
}

fn open_range(shared: &Rc<QueryShared>, range: &GeohashRange) -> RangeHandles {
    let store = shared.store.clone();

    let weak = Rc::downgrade(shared);
    let added = store.on_child_added(
        &range.start,
        &range.end,
        Box::new(move |record| {
            if let Some(shared) = weak.upgrade() {
                handle_child_update(&shared, record);
            }
        }),
    );

    let weak = Rc::downgrade(shared);
    let changed = store.on_child_changed(
        &range.start,
        &range.end,
        Box::new(move |record| {
            if let Some(shared) = weak.upgrade() {
                handle_child_update(&shared, record);
            }
        }),
    );

    let weak = Rc::downgrade(shared);
    let removed = store.on_child_removed(
        &range.start,
        &range.end,
        Box::new(move |record| {
            if let Some(shared) = weak.upgrade() {
                handle_child_removed(&shared, record);
            }
        }),
    );

    let weak = Rc::downgrade(shared);
    let value_range = range.clone();
    let value = store.on_value(
        &range.start,
        &range.end,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                handle_range_value(&shared, &value_range);
            }
        }),
    );

    RangeHandles {
        added,
        changed,
        removed,
        value,
    }
}

/// A record was added to or changed within one of the watched ranges.
fn handle_child_update(shared: &Rc<QueryShared>, record: &Record) {
    if shared.cancelled.get() {
        return;
    }
    run_due_cleanup(shared);

    if validation::validate_location(&record.location).is_err() {
        log::warn!("ignoring record {:?}: invalid location", record.key);
        return;
    }
    let geohash = match codec::encode(record.location, shared.config.geohash_precision) {
        Ok(geohash) => geohash,
        Err(err) => {
            log::warn!("ignoring record {:?}: {err}", record.key);
            return;
        }
    };

    let transition = {
        let mut state = shared.state.borrow_mut();
        let center = state.center;
        let radius_km = state.radius_km;
        state
            .tracker
            .update(&record.key, record.location, geohash, center, radius_km)
    };

    if let Some(transition) = transition {
        dispatch_transition(shared, transition);
    }
}

/// A record left one of the watched ranges, by deletion or relocation.
///
/// A relocation into another watched range fires a spurious removal from
/// the old range; the fresh point read disambiguates, and the add event
/// from the new range carries the actual transition.
fn handle_child_removed(shared: &Rc<QueryShared>, record: &Record) {
    if shared.cancelled.get() {
        return;
    }
    run_due_cleanup(shared);

    if !shared.state.borrow().tracker.contains(&record.key) {
        return;
    }

    let current = shared.store.read(&record.key);
    if shared.cancelled.get() {
        return;
    }

    let transition = {
        let mut state = shared.state.borrow_mut();
        let center = state.center;
        match current {
            None => state.tracker.remove(&record.key, None, center),
            Some(current) => {
                let geohash = codec::encode(current.location, shared.config.geohash_precision).ok();
                let still_watched = geohash
                    .as_deref()
                    .is_some_and(|hash| state.subscriptions.contains_hash(hash));
                if still_watched {
                    None
                } else {
                    state
                        .tracker
                        .remove(&record.key, Some(current.location), center)
                }
            }
        }
    };

    if let Some(transition) = transition {
        dispatch_transition(shared, transition);
    }
}

/// A watched range finished delivering its initial backlog.
fn handle_range_value(shared: &Rc<QueryShared>, range: &GeohashRange) {
    if shared.cancelled.get() {
        return;
    }

    let completed = {
        let mut state = shared.state.borrow_mut();
        state.outstanding_ready.remove(range);
        state.outstanding_ready.is_empty()
    };

    if completed && !shared.value_event_fired.get() {
        shared.value_event_fired.set(true);
        dispatch(shared, QueryEventKind::Ready, &QueryEvent::Ready);
    }
}

fn run_due_cleanup(shared: &Rc<QueryShared>) {
    let now = Instant::now();
    let mut state = shared.state.borrow_mut();
    if !state.subscriptions.cleanup_due(now) {
        return;
    }
    let QueryState {
        subscriptions,
        tracker,
        ..
    } = &mut *state;
    subscriptions.run_cleanup(shared.store.as_ref(), now);
    if let Err(err) = tracker.garbage_collect(|geohash| subscriptions.contains_hash(geohash)) {
        debug_assert!(false, "{err}");
        log::error!("skipping tracked-location cleanup: {err}");
    }
}

fn dispatch_transition(shared: &Rc<QueryShared>, transition: Transition) {
    let event = match transition {
        Transition::Entered {
            key,
            location,
            distance_km,
        } => QueryEvent::KeyEntered {
            key,
            location,
            distance_km,
        },
        Transition::Moved {
            key,
            location,
            distance_km,
        } => QueryEvent::KeyMoved {
            key,
            location,
            distance_km,
        },
        Transition::Exited {
            key,
            location,
            distance_km,
        } => QueryEvent::KeyExited {
            key,
            location,
            distance_km,
        },
    };
    dispatch(shared, event.kind(), &event);
}

/// Deliver an event to every registered callback, in insertion order,
/// stopping as soon as the query is cancelled.
fn dispatch(shared: &Rc<QueryShared>, kind: QueryEventKind, event: &QueryEvent) {
    let slots: Vec<Rc<CallbackSlot>> = {
        let mut list = shared.listeners.list(kind).borrow_mut();
        list.retain(|slot| slot.active.get());
        list.clone()
    };

    for slot in slots {
        if shared.cancelled.get() {
            break;
        }
        if !slot.active.get() {
            continue;
        }
        invoke_slot(&slot, event);
    }
}

/// Replay the current membership to one freshly registered `key_entered`
/// callback, checking for cancellation between deliveries.
fn replay_membership(shared: &Rc<QueryShared>, slot: &Rc<CallbackSlot>) {
    let snapshot = shared.state.borrow().tracker.inside_snapshot();
    for (key, location, distance_km) in snapshot {
        if shared.cancelled.get() || !slot.active.get() {
            break;
        }
        invoke_slot(
            slot,
            &QueryEvent::KeyEntered {
                key,
                location,
                distance_km,
            },
        );
    }
}

fn invoke_slot(slot: &Rc<CallbackSlot>, event: &QueryEvent) {
    if let Ok(mut callback) = slot.callback.try_borrow_mut() {
        (*callback)(event);
    }
}
