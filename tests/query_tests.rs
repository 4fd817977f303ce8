//! End-to-end tests for live queries over the in-memory store.

use geoflux::{
    Config, GeoFlux, GeoFluxError, GeoQuery, MemoryStore, Point, QueryCriteria, QueryEvent,
    QueryEventKind,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn center() -> Point<f64> {
    // (latitude 1, longitude 2)
    Point::new(2.0, 1.0)
}

fn criteria() -> QueryCriteria {
    QueryCriteria::new(center(), 1000.0)
}

/// Register one logging callback per event kind, entered first so a replay
/// lands ahead of the `ready` registration.
fn watch(query: &GeoQuery) -> Rc<RefCell<Vec<QueryEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for kind in [
        QueryEventKind::KeyEntered,
        QueryEventKind::KeyExited,
        QueryEventKind::KeyMoved,
        QueryEventKind::Ready,
    ] {
        let sink = log.clone();
        query.on(kind, move |event| sink.borrow_mut().push(event.clone()));
    }
    log
}

fn keys_of(events: &[QueryEvent], kind: QueryEventKind) -> Vec<String> {
    let mut keys: Vec<String> = events
        .iter()
        .filter(|event| event.kind() == kind)
        .map(|event| match event {
            QueryEvent::KeyEntered { key, .. }
            | QueryEvent::KeyExited { key, .. }
            | QueryEvent::KeyMoved { key, .. } => key.clone(),
            QueryEvent::Ready => unreachable!(),
        })
        .collect();
    keys.sort();
    keys
}

fn count_of(events: &[QueryEvent], kind: QueryEventKind) -> usize {
    events.iter().filter(|event| event.kind() == kind).count()
}

fn write_test_points(geo: &GeoFlux) {
    geo.set("loc1", Point::new(3.0, 2.0)).unwrap(); // (2, 3): ~157 km, inside
    geo.set("loc2", Point::new(-7.0, 50.0)).unwrap(); // far, outside
    geo.set("loc3", Point::new(-150.0, 16.0)).unwrap(); // far, outside
    geo.set("loc4", Point::new(5.0, 5.0)).unwrap(); // (5, 5): ~550 km, inside
    geo.set("loc5", Point::new(55.0, 67.0)).unwrap(); // far, outside
}

#[test]
fn initial_membership_replays_before_ready() {
    let geo = GeoFlux::new(MemoryStore::new());
    write_test_points(&geo);

    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);

    let events = log.borrow();
    assert_eq!(events.len(), 3, "{events:?}");
    assert!(matches!(events[0], QueryEvent::KeyEntered { .. }));
    assert!(matches!(events[1], QueryEvent::KeyEntered { .. }));
    assert_eq!(events[2], QueryEvent::Ready);
    assert_eq!(
        keys_of(&events, QueryEventKind::KeyEntered),
        vec!["loc1", "loc4"]
    );
}

#[test]
fn live_writes_fire_membership_events() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);

    write_test_points(&geo);

    let events = log.borrow();
    // Ready fires at construction (no backlog), then the inside keys enter
    assert_eq!(events[0], QueryEvent::Ready);
    assert_eq!(
        keys_of(&events, QueryEventKind::KeyEntered),
        vec!["loc1", "loc4"]
    );
    assert_eq!(count_of(&events, QueryEventKind::KeyExited), 0);
    assert_eq!(count_of(&events, QueryEventKind::KeyMoved), 0);
}

#[test]
fn moving_the_circle_exits_members_without_moves() {
    let geo = GeoFlux::new(MemoryStore::new());
    write_test_points(&geo);
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);
    log.borrow_mut().clear();

    query
        .update_criteria(QueryCriteria::with_center(Point::new(90.0, 90.0)))
        .unwrap();

    let events = log.borrow();
    assert_eq!(
        keys_of(&events, QueryEventKind::KeyExited),
        vec!["loc1", "loc4"]
    );
    assert_eq!(count_of(&events, QueryEventKind::KeyMoved), 0);
    assert_eq!(*events.last().unwrap(), QueryEvent::Ready);

    // The exits were carried by the criteria change, before the new plan's
    // subscriptions delivered anything
    let first_ready = events.iter().position(|e| *e == QueryEvent::Ready).unwrap();
    assert!(
        events[..first_ready]
            .iter()
            .all(|e| e.kind() == QueryEventKind::KeyExited)
    );

    // Radius was preserved by the merge
    assert_eq!(query.radius_km(), 1000.0);
    assert_eq!(query.center(), Point::new(90.0, 90.0));
}

#[test]
fn moving_inside_the_circle_fires_key_moved() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);

    geo.set("loc1", Point::new(0.0, 0.0)).unwrap();
    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();

    let events = log.borrow();
    assert_eq!(events.len(), 3, "{events:?}");
    assert_eq!(events[0], QueryEvent::Ready);
    assert!(matches!(&events[1], QueryEvent::KeyEntered { key, .. } if key == "loc1"));
    match &events[2] {
        QueryEvent::KeyMoved {
            key,
            location,
            distance_km,
        } => {
            assert_eq!(key, "loc1");
            assert_eq!(*location, Point::new(3.0, 2.0));
            assert!((distance_km - 157.23).abs() < 0.1, "{distance_km}");
        }
        other => panic!("expected KeyMoved, got {other:?}"),
    }
}

#[test]
fn deletion_exits_with_null_payload() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);

    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();
    geo.remove("loc1").unwrap();

    let events = log.borrow();
    assert_eq!(events.len(), 3, "{events:?}");
    assert_eq!(
        events[2],
        QueryEvent::KeyExited {
            key: "loc1".to_string(),
            location: None,
            distance_km: None,
        }
    );
}

#[test]
fn cancelling_one_query_leaves_others_running() {
    let geo = GeoFlux::new(MemoryStore::new());
    let q1 = geo.query(criteria()).unwrap();
    let q2 = geo.query(criteria()).unwrap();
    let log1 = watch(&q1);
    let log2 = watch(&q2);

    q1.cancel();
    q1.cancel();

    let frozen = log1.borrow().len();
    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();

    assert_eq!(log1.borrow().len(), frozen);
    assert_eq!(
        keys_of(&log2.borrow(), QueryEventKind::KeyEntered),
        vec!["loc1"]
    );
}

#[test]
fn cancel_during_replay_stops_after_one_event() {
    let geo = GeoFlux::new(MemoryStore::new());
    for i in 0..5 {
        let location = Point::new(3.0, 2.0 + f64::from(i) * 0.1);
        geo.set(&format!("loc{i}"), location).unwrap();
    }

    let query = Rc::new(geo.query(criteria()).unwrap());
    let hits = Rc::new(Cell::new(0));

    let q = query.clone();
    let sink = hits.clone();
    query.on(QueryEventKind::KeyEntered, move |_| {
        sink.set(sink.get() + 1);
        q.cancel();
    });

    assert_eq!(hits.get(), 1);
}

#[test]
fn cancel_during_update_criteria_aborts_dispatch() {
    let geo = GeoFlux::new(MemoryStore::new());
    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();
    geo.set("loc4", Point::new(5.0, 5.0)).unwrap();

    let query = Rc::new(geo.query(criteria()).unwrap());
    let exits = Rc::new(Cell::new(0));

    let q = query.clone();
    let sink = exits.clone();
    query.on(QueryEventKind::KeyExited, move |_| {
        sink.set(sink.get() + 1);
        q.cancel();
    });

    query
        .update_criteria(QueryCriteria::with_center(Point::new(90.0, 90.0)))
        .unwrap();

    // Both keys left the circle, but the first exit cancelled the query
    assert_eq!(exits.get(), 1);

    assert!(matches!(
        query.update_criteria(QueryCriteria::with_radius_km(5.0)),
        Err(GeoFluxError::QueryCancelled)
    ));
}

#[test]
fn on_after_cancel_returns_inert_registration() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    query.cancel();

    let hits = Rc::new(Cell::new(0));
    let sink = hits.clone();
    let registration = query.on(QueryEventKind::KeyEntered, move |_| {
        sink.set(sink.get() + 1);
    });

    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();
    assert_eq!(hits.get(), 0);

    registration.cancel();
    registration.cancel();
}

#[test]
fn registration_cancel_detaches_one_callback() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();

    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));

    let sink = first.clone();
    let registration = query.on(QueryEventKind::KeyEntered, move |_| {
        sink.set(sink.get() + 1);
    });
    let sink = second.clone();
    query.on(QueryEventKind::KeyEntered, move |_| {
        sink.set(sink.get() + 1);
    });

    geo.set("a", Point::new(3.0, 2.0)).unwrap();
    assert_eq!((first.get(), second.get()), (1, 1));

    registration.cancel();
    registration.cancel();

    geo.set("b", Point::new(4.0, 2.0)).unwrap();
    assert_eq!((first.get(), second.get()), (1, 2));
}

#[test]
fn ready_listener_after_barrier_fires_immediately() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();

    let hits = Rc::new(Cell::new(0));
    let sink = hits.clone();
    query.on(QueryEventKind::Ready, move |_| {
        sink.set(sink.get() + 1);
    });
    assert_eq!(hits.get(), 1);

    // It does not fire again without a criteria change
    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();
    assert_eq!(hits.get(), 1);
}

#[test]
fn update_criteria_rearms_ready() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);
    log.borrow_mut().clear();

    query.update_criteria(criteria()).unwrap();
    assert_eq!(*log.borrow(), vec![QueryEvent::Ready]);

    query.update_criteria(criteria()).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![QueryEvent::Ready, QueryEvent::Ready]
    );
}

#[test]
fn radius_update_preserves_center() {
    let geo = GeoFlux::new(MemoryStore::new());
    geo.set("p", Point::new(1.0, 0.0)).unwrap(); // ~111 km east of (0, 0)

    let origin = Point::new(0.0, 0.0);
    let query = geo.query(QueryCriteria::new(origin, 50.0)).unwrap();
    let log = watch(&query);
    log.borrow_mut().clear();

    query
        .update_criteria(QueryCriteria::with_radius_km(200.0))
        .unwrap();

    let events = log.borrow();
    assert_eq!(keys_of(&events, QueryEventKind::KeyEntered), vec!["p"]);
    assert_eq!(*events.last().unwrap(), QueryEvent::Ready);
    assert_eq!(query.center(), origin);
    assert_eq!(query.radius_km(), 200.0);
}

#[test]
fn moving_out_of_range_exits_with_location() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);

    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();
    geo.set("loc1", Point::new(50.0, 50.0)).unwrap();

    let events = log.borrow();
    assert_eq!(
        *events.last().unwrap(),
        QueryEvent::KeyExited {
            key: "loc1".to_string(),
            location: Some(Point::new(50.0, 50.0)),
            distance_km: Some(geoflux::geometry::distance_km(
                Point::new(50.0, 50.0),
                center()
            )),
        }
    );
}

#[test]
fn relocation_across_ranges_fires_single_move() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = geo.query(criteria()).unwrap();
    let log = watch(&query);

    geo.set("loc1", Point::new(3.0, 2.0)).unwrap();
    // Still inside the circle, but in a different geohash quadrant: the old
    // range fires a spurious removal alongside the new range's add
    geo.set("loc1", Point::new(-1.0, -1.0)).unwrap();

    let events = log.borrow();
    assert_eq!(count_of(&events, QueryEventKind::KeyEntered), 1);
    assert_eq!(count_of(&events, QueryEventKind::KeyMoved), 1);
    assert_eq!(count_of(&events, QueryEventKind::KeyExited), 0);
}

#[test]
fn boundary_distance_counts_as_inside() {
    let origin = Point::new(0.0, 0.0);
    let edge = Point::new(1.0, 1.0);
    let exact = geoflux::geometry::distance_km(edge, origin);

    let geo = GeoFlux::new(MemoryStore::new());
    geo.set("edge", edge).unwrap();

    let query = geo.query(QueryCriteria::new(origin, exact)).unwrap();
    let log = watch(&query);
    assert_eq!(
        keys_of(&log.borrow(), QueryEventKind::KeyEntered),
        vec!["edge"]
    );

    let tight = geo
        .query(QueryCriteria::new(origin, exact * 0.999))
        .unwrap();
    let log = watch(&tight);
    assert_eq!(count_of(&log.borrow(), QueryEventKind::KeyEntered), 0);
}

#[test]
fn extreme_precisions_still_resolve_membership() {
    for precision in [1, 12] {
        let config = Config::with_geohash_precision(precision);
        let geo = GeoFlux::with_config(MemoryStore::new(), config);
        geo.set("near", Point::new(3.0, 2.0)).unwrap();
        geo.set("far", Point::new(-7.0, 50.0)).unwrap();

        let query = geo.query(criteria()).unwrap();
        let log = watch(&query);
        assert_eq!(
            keys_of(&log.borrow(), QueryEventKind::KeyEntered),
            vec!["near"],
            "precision {precision}"
        );
    }
}

#[test]
fn panning_far_away_tears_down_old_ranges() {
    let config = Config::default()
        .with_max_idle_ranges(1)
        .with_cleanup_debounce(std::time::Duration::from_millis(0));
    let geo = GeoFlux::with_config(MemoryStore::new(), config);
    geo.set("home", Point::new(3.0, 2.0)).unwrap();

    let query = geo.query(QueryCriteria::new(center(), 200.0)).unwrap();
    let log = watch(&query);
    assert_eq!(keys_of(&log.borrow(), QueryEventKind::KeyEntered), vec!["home"]);

    // Pan to the other side of the globe; home exits and its ranges go idle
    query
        .update_criteria(QueryCriteria::with_center(Point::new(-60.0, -30.0)))
        .unwrap();
    assert_eq!(keys_of(&log.borrow(), QueryEventKind::KeyExited), vec!["home"]);

    // The next deliveries run the due cleanup, detaching the idle ranges
    geo.set("away", Point::new(-60.0, -30.1)).unwrap();
    log.borrow_mut().clear();

    // A write back home lands in a range this query no longer watches
    geo.set("home", Point::new(3.1, 2.0)).unwrap();
    assert_eq!(log.borrow().len(), 0, "{:?}", log.borrow());
}

#[test]
fn callbacks_can_reenter_the_query() {
    let geo = GeoFlux::new(MemoryStore::new());
    let query = Rc::new(geo.query(criteria()).unwrap());

    // Shrink the circle from inside a key_entered callback
    let q = query.clone();
    let shrunk = Rc::new(Cell::new(false));
    let flag = shrunk.clone();
    query.on(QueryEventKind::KeyEntered, move |_| {
        if !flag.get() {
            flag.set(true);
            q.update_criteria(QueryCriteria::with_radius_km(1.0)).unwrap();
        }
    });

    let exits = Rc::new(Cell::new(0));
    let sink = exits.clone();
    query.on(QueryEventKind::KeyExited, move |_| {
        sink.set(sink.get() + 1);
    });

    geo.set("loc1", Point::new(5.0, 5.0)).unwrap(); // ~550 km: inside 1000, outside 1

    assert!(shrunk.get());
    assert_eq!(exits.get(), 1);
    assert_eq!(query.radius_km(), 1.0);
}

#[test]
fn dropping_a_query_cancels_it() {
    let geo = GeoFlux::new(MemoryStore::new());
    let hits = Rc::new(Cell::new(0));

    {
        let query = geo.query(criteria()).unwrap();
        let sink = hits.clone();
        query.on(QueryEventKind::KeyEntered, move |_| {
            sink.set(sink.get() + 1);
        });
        geo.set("a", Point::new(3.0, 2.0)).unwrap();
        assert_eq!(hits.get(), 1);
    }

    geo.set("b", Point::new(4.0, 2.0)).unwrap();
    assert_eq!(hits.get(), 1);
}
