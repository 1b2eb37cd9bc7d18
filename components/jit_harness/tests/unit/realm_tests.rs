//! Unit tests for the realm arena

use core_types::{ErrorKind, ThrownError};
use jit_harness::realm::{Isolation, RealmError, RealmOptions};
use jit_harness::{RealmArena, Trace, TraceEvent};

#[test]
fn test_slot_reuse_bumps_generation() {
    let mut arena = RealmArena::new();
    let first = arena
        .create_realm(RealmOptions::new(Isolation::FreshCompartment))
        .unwrap();
    assert!(arena.destroy_realm(first));
    assert!(!arena.destroy_realm(first));

    let second = arena
        .create_realm(RealmOptions::new(Isolation::FreshGlobal))
        .unwrap();
    assert_eq!(second.index(), first.index());
    assert_ne!(second.generation(), first.generation());
    assert!(!arena.is_live(first));
    assert_eq!(arena.handle_for(first.index()), Some(second));
    assert_eq!(arena.zone(first), Err(RealmError::StaleHandle(first)));
}

#[test]
fn test_same_zone_anchor_must_be_live() {
    let mut arena = RealmArena::new();
    let anchor = arena
        .create_realm(RealmOptions::new(Isolation::FreshCompartment))
        .unwrap();
    arena.destroy_realm(anchor);
    let err = arena
        .create_realm(RealmOptions::new(Isolation::SameZoneAs(anchor)))
        .unwrap_err();
    assert_eq!(err, RealmError::StaleHandle(anchor));
}

#[test]
fn test_teardown_invalidates_everything() {
    let mut arena = RealmArena::new();
    let main = arena
        .create_realm(RealmOptions::new(Isolation::FreshGlobal))
        .unwrap();
    let observer = arena.attach_observer(main).unwrap();
    arena.teardown();

    assert!(arena.is_empty());
    assert!(arena.specs().is_empty());
    assert_eq!(arena.collect(observer), Err(RealmError::StaleHandle(main)));
}

#[test]
fn test_unobserved_realm_drops_events() {
    let mut arena = RealmArena::new();
    let main = arena
        .create_realm(RealmOptions::new(Isolation::FreshGlobal))
        .unwrap();
    let recorded = arena
        .record(main, TraceEvent::ScriptLoad { url: "a.js".into() })
        .unwrap();
    assert!(!recorded);
}

#[test]
fn test_trace_serializes_in_order() {
    let trace = Trace::from(vec![
        TraceEvent::ScriptLoad { url: "lib.js".into() },
        TraceEvent::ExceptionThrown(ThrownError::new(ErrorKind::TypeError, "x is null")),
    ]);
    let json = serde_json::to_string(&trace).unwrap();
    assert!(json.find("script-load").unwrap() < json.find("exception-thrown").unwrap());

    let back: Trace = serde_json::from_str(&json).unwrap();
    assert_eq!(back, trace);
}
