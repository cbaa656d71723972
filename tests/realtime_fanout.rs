//! Realtime fan-out through the sync service: channel sharing, filtering,
//! observer isolation, and teardown.

mod fixtures;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use habit_sync::core::{RawChange, RawEventType};
use habit_sync::sync::TransportError;
use habit_sync::{ChangeEvent, Error, Transience};
use serde_json::json;

use fixtures::harness::{Harness, Inbox, completions, habits, owner, record};

fn insert_for(user: &str, id: &str) -> ChangeEvent {
    ChangeEvent::insert(habits(), record(json!({"id": id, "user_id": user})))
}

#[test]
fn subscribers_on_one_key_share_a_channel() {
    let harness = Harness::new();
    let first = Inbox::default();
    let second = Inbox::default();

    let sub_a = {
        let inbox = first.clone();
        harness
            .service
            .subscribe_to_entity_changes(habits(), Some(owner("u1")), move |event| {
                inbox.push(event);
                Ok(())
            })
            .unwrap()
    };
    let sub_b = {
        let inbox = second.clone();
        harness
            .service
            .subscribe_to_entity_changes(habits(), Some(owner("u1")), move |event| {
                inbox.push(event);
                Ok(())
            })
            .unwrap()
    };

    assert_eq!(harness.transport.opened(), 1);
    assert_eq!(harness.transport.emit(&insert_for("u1", "h1")), 2);
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);

    sub_a.unsubscribe();
    assert_eq!(harness.transport.closed(), 0);
    assert_eq!(harness.transport.emit(&insert_for("u1", "h2")), 1);
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);

    drop(sub_b);
    assert_eq!(harness.transport.closed(), 1);
    assert_eq!(harness.transport.open_channels(), 0);
    assert_eq!(harness.service.registry().channel_count().unwrap(), 0);
    assert_eq!(harness.transport.emit(&insert_for("u1", "h3")), 0);
}

#[test]
fn distinct_filters_and_entities_get_their_own_channels() {
    let harness = Harness::new();
    let u1 = Inbox::default();
    let u2 = Inbox::default();
    let done = Inbox::default();

    let subscribe = |entity, user: &str, inbox: &Inbox| {
        let inbox = inbox.clone();
        harness
            .service
            .subscribe_to_entity_changes(entity, Some(owner(user)), move |event| {
                inbox.push(event);
                Ok(())
            })
            .unwrap()
    };
    let _subs = [
        subscribe(habits(), "u1", &u1),
        subscribe(habits(), "u2", &u2),
        subscribe(completions(), "u1", &done),
    ];

    assert_eq!(harness.transport.opened(), 3);
    harness.transport.emit(&insert_for("u2", "h9"));
    assert_eq!(u1.len(), 0);
    assert_eq!(u2.len(), 1);
    assert_eq!(done.len(), 0);
}

#[test]
fn failing_and_panicking_observers_do_not_starve_others() {
    let harness = Harness::new();
    let reached = Arc::new(AtomicUsize::new(0));

    let _failing = harness
        .service
        .subscribe_to_entity_changes(habits(), None, |_| Err("storage full".into()))
        .unwrap();
    let _panicking = harness
        .service
        .subscribe_to_entity_changes(habits(), None, |_| panic!("observer bug"))
        .unwrap();
    let _counting = {
        let reached = Arc::clone(&reached);
        harness
            .service
            .subscribe_to_entity_changes(habits(), None, move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
    };

    let handled = harness.transport.emit(&insert_for("u1", "h1"));
    assert_eq!(handled, 1);
    assert_eq!(reached.load(Ordering::SeqCst), 1);

    // The channel survives observer failures.
    harness.transport.emit(&insert_for("u1", "h2"));
    assert_eq!(reached.load(Ordering::SeqCst), 2);
}

#[test]
fn wire_notifications_are_validated_before_delivery() {
    let harness = Harness::new();
    let inbox = Inbox::default();
    let _sub = {
        let inbox = inbox.clone();
        harness
            .service
            .subscribe_to_entity_changes(habits(), Some(owner("u1")), move |event| {
                inbox.push(event);
                Ok(())
            })
            .unwrap()
    };

    let well_formed = RawChange {
        table: "habits".into(),
        event_type: RawEventType::Update,
        new: Some(json!({"id": "h1", "user_id": "u1", "name": "Read"})),
        old: Some(json!({"id": "h1"})),
        commit_timestamp: Some(1_700_000_000_500),
        client_request_id: None,
    };
    assert_eq!(harness.transport.emit_raw(&well_formed), 1);

    let missing_new = RawChange {
        new: None,
        ..well_formed.clone()
    };
    assert_eq!(harness.transport.emit_raw(&missing_new), 0);

    let events = inbox.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind.as_str(), "update");
    assert!(events[0].committed_at.is_some());
}

#[test]
fn establish_failure_leaves_no_channel_behind() {
    let harness = Harness::new();
    harness.transport.fail_next(TransportError::Unreachable {
        reason: "socket closed".into(),
    });

    let err = harness
        .service
        .subscribe_to_entity_changes(habits(), Some(owner("u1")), |_| Ok(()))
        .unwrap_err();
    let err = Error::from(err);
    assert_eq!(err.transience(), Transience::Retryable);
    assert_eq!(harness.service.registry().channel_count().unwrap(), 0);

    // A later attempt opens the channel normally.
    let _sub = harness
        .service
        .subscribe_to_entity_changes(habits(), Some(owner("u1")), |_| Ok(()))
        .unwrap();
    assert_eq!(harness.transport.open_channels(), 1);
}
