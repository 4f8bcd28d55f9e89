//! End-to-end scenarios against the simulated backend.
//!
//! Each test drives a [`SimWorld`]: the real client state machine wired to an
//! in-process server that checks the wire protocol as it goes.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tether_client::{
    ClientConfig, ConnectionState, EventKind, Listener, Notification, ReconnectPolicy, RoomId,
    ServerMessage,
};
use tether_harness::{SimWorld, VALID_TOKEN, new_message_payload};
use tether_proto::ClientMessage;

fn joins(messages: &[&ClientMessage]) -> Vec<RoomId> {
    messages
        .iter()
        .filter_map(|message| match message {
            ClientMessage::JoinRoom { room_id } => Some(room_id.clone()),
            _ => None,
        })
        .collect()
}

fn counter() -> (Listener, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let listener: Listener = Arc::new(move |_: &Notification| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (listener, count)
}

#[test]
fn rejected_token_lands_disconnected_without_retry() {
    let mut world = SimWorld::new();
    let (listener, rejections) = counter();
    world.registry_mut().on(EventKind::AuthRejected, listener);

    assert!(world.connect("bad-token").is_ok());

    assert_eq!(world.client().state(), ConnectionState::Disconnected);
    assert!(!world.client().is_connected());
    assert!(!world.client().has_pending_reconnect());
    assert_eq!(world.client().next_deadline(), None);
    assert_eq!(rejections.load(Ordering::SeqCst), 1);

    world.advance(Duration::from_secs(600));
    assert_eq!(world.backend().opens(), 1);
}

#[test]
fn duplicate_join_sends_one_request() {
    let mut world = SimWorld::new();
    assert!(world.connect(VALID_TOKEN).is_ok());

    world.join("m1");
    world.join("m1");

    let connection = world.backend().connection().unwrap();
    assert_eq!(joins(&world.backend().received_on(connection)), vec![RoomId::new("m1")]);
    assert!(world.backend().violations().is_empty());
}

#[test]
fn reconnect_replays_rooms_in_join_order() {
    let mut world = SimWorld::new();
    assert!(world.connect(VALID_TOKEN).is_ok());
    world.join("m1");
    world.join("m2");

    world.drop_transport();
    assert_eq!(world.client().state(), ConnectionState::Reconnecting);

    world.advance(Duration::from_secs(1));
    assert_eq!(world.client().state(), ConnectionState::Authenticated);

    let connection = world.backend().connection().unwrap();
    assert_eq!(
        joins(&world.backend().received_on(connection)),
        vec![RoomId::new("m1"), RoomId::new("m2")]
    );
}

#[test]
fn rooms_joined_offline_are_sent_after_authentication() {
    let mut world = SimWorld::new();
    world.join("m1");
    world.join("m2");
    world.leave("m1");

    assert!(world.backend().received().is_empty());

    assert!(world.connect(VALID_TOKEN).is_ok());
    assert_eq!(world.backend().members(), &[RoomId::new("m2")]);
}

#[test]
fn backoff_doubles_until_the_ceiling() {
    let mut world = SimWorld::new();
    assert!(world.connect(VALID_TOKEN).is_ok());
    world.set_network(false);
    world.drop_transport();

    let mut retries_at = Vec::new();
    while world.client().has_pending_reconnect() {
        let before = world.backend().opens();
        world.run_until_idle(1);
        if world.backend().opens() > before {
            retries_at.push(world.now().elapsed());
        }
    }

    let secs: Vec<_> = retries_at.iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![1, 3, 7, 15, 31]);
    assert_eq!(world.client().state(), ConnectionState::Disconnected);
    assert!(world.notifications().iter().any(|n| matches!(
        n,
        Notification::ReconnectExhausted { attempts: 5 }
    )));
}

#[test]
fn connect_after_exhaustion_starts_fresh_cycle() {
    let policy = ReconnectPolicy { max_attempts: 1, ..ReconnectPolicy::default() };
    let mut world = SimWorld::with_config(ClientConfig { reconnect: policy, ..ClientConfig::default() }, 0);
    world.set_network(false);

    assert!(world.connect(VALID_TOKEN).is_ok());
    world.run_until_idle(10);
    assert_eq!(world.client().state(), ConnectionState::Disconnected);

    world.set_network(true);
    assert!(world.connect(VALID_TOKEN).is_ok());
    assert_eq!(world.client().state(), ConnectionState::Authenticated);
    assert_eq!(world.client().reconnect_attempts(), 0);
}

#[test]
fn disconnect_cancels_pending_retry_and_clears_rooms() {
    let mut world = SimWorld::new();
    assert!(world.connect(VALID_TOKEN).is_ok());
    world.join("m1");
    world.drop_transport();
    assert!(world.client().has_pending_reconnect());

    world.disconnect();
    let opens = world.backend().opens();
    world.advance(Duration::from_secs(120));

    assert_eq!(world.backend().opens(), opens);
    assert_eq!(world.client().state(), ConnectionState::Disconnected);
    assert!(world.client().rooms().is_empty());
}

#[test]
fn stray_acknowledgment_is_ignored_after_rejection() {
    let mut world = SimWorld::new();
    assert!(world.connect("bad-token").is_ok());

    world.deliver(ServerMessage::Authenticated);
    assert_eq!(world.client().state(), ConnectionState::Disconnected);
}

#[test]
fn commands_before_authentication_are_dropped() {
    let mut world = SimWorld::new();
    world.start_typing("m1");
    world.mark_read("msg-1", "m1");

    assert!(world.connect(VALID_TOKEN).is_ok());
    assert!(world.backend().violations().is_empty());

    let typing = world
        .backend()
        .received()
        .iter()
        .filter(|(_, m)| matches!(m, ClientMessage::TypingStart { .. } | ClientMessage::MarkRead { .. }))
        .count();
    assert_eq!(typing, 0);
}

#[test]
fn messages_outside_active_room_raise_local_notification() {
    let mut world = SimWorld::new();
    assert!(world.connect(VALID_TOKEN).is_ok());
    world.set_active_room(Some("m1"));

    assert!(world.push_event("new_message", new_message_payload("a", "m1")));
    assert!(world.push_event("new_message", new_message_payload("b", "m2")));

    let rooms: Vec<_> = world.local_notifications().iter().map(|(room, _)| room.clone()).collect();
    assert_eq!(rooms, vec![RoomId::new("m2")]);
}

#[test]
fn failing_listener_does_not_block_others() {
    let mut world = SimWorld::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&order);
    world.registry_mut().on(
        EventKind::NewMessage,
        Arc::new(move |_: &Notification| first.lock().unwrap().push("first")),
    );
    world.registry_mut().on(
        EventKind::NewMessage,
        Arc::new(|_: &Notification| panic!("listener failure")),
    );
    let last = Arc::clone(&order);
    world.registry_mut().on(
        EventKind::NewMessage,
        Arc::new(move |_: &Notification| last.lock().unwrap().push("last")),
    );

    assert!(world.connect(VALID_TOKEN).is_ok());
    assert!(world.push_event("new_message", new_message_payload("a", "m1")));
    assert!(world.push_event("new_message", new_message_payload("b", "m1")));

    assert_eq!(*order.lock().unwrap(), vec!["first", "last", "first", "last"]);
}

#[test]
fn failing_listener_does_not_block_other_events() {
    let mut world = SimWorld::new();
    world
        .registry_mut()
        .on(EventKind::NewMessage, Arc::new(|_: &Notification| panic!("listener failure")));
    let (presence, presence_count) = counter();
    world.registry_mut().on(EventKind::Presence, presence);
    let (state, state_count) = counter();
    world.registry_mut().on(EventKind::StateChanged, state);

    assert!(world.connect(VALID_TOKEN).is_ok());
    let transitions = state_count.load(Ordering::SeqCst);
    assert!(world.push_event("new_message", new_message_payload("a", "m1")));

    assert!(world.push_event("presence", serde_json::json!({ "user_id": "u1", "online": true })));
    assert_eq!(presence_count.load(Ordering::SeqCst), 1);

    world.drop_transport();
    assert_eq!(state_count.load(Ordering::SeqCst), transitions + 1);

    world.advance(Duration::from_secs(1));
    assert_eq!(world.client().state(), ConnectionState::Authenticated);
    assert!(world.push_event("new_message", new_message_payload("b", "m1")));
    assert!(world.push_event("presence", serde_json::json!({ "user_id": "u1", "online": false })));
    assert_eq!(presence_count.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_events_reach_string_keyed_listeners() {
    let mut world = SimWorld::new();
    let (listener, count) = counter();
    world.registry_mut().on("shipment_updated", listener);

    assert!(world.connect(VALID_TOKEN).is_ok());
    assert!(world.push_event("shipment_updated", serde_json::json!({ "id": 7 })));

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn flaky_network_eventually_authenticates() {
    let mut world = SimWorld::with_config(ClientConfig::default(), 7);
    world.set_open_failure_rate(0.5);

    let mut authenticated = false;
    for _ in 0..20 {
        if world.client().state() == ConnectionState::Disconnected {
            assert!(world.connect(VALID_TOKEN).is_ok());
        }
        world.run_until_idle(10);
        if world.client().state() == ConnectionState::Authenticated {
            authenticated = true;
            break;
        }
    }

    assert!(authenticated);
    assert!(world.backend().violations().is_empty());
}
