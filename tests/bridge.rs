//! Subscription bridge tests over the in-memory store.

use planning_poker::{
    BridgeConfig, ClientConfig, DocumentStore, Estimate, MemoryStore, PokerClient, QueryEvent,
    QueryState, SessionApi, Snapshot, StoreError, SubscriptionBridge, Target, View,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn test_client() -> (Arc<MemoryStore>, PokerClient) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = PokerClient::init(store.clone(), ClientConfig::default());
    (store, client)
}

fn drain(observer: &planning_poker::Observer) -> Vec<QueryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = observer.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_observers_share_one_store_subscription() {
    let (store, client) = test_client();
    let id = client.sessions().create_session("Sprint", "u1").unwrap();

    let a = client.watch_session(&id).unwrap();
    let b = client.watch_session(&id).unwrap();
    let c = client.watch_sessions().unwrap();
    assert_eq!(store.listener_count(), 2);
    assert_eq!(client.bridge().active_subscriptions(), 2);

    client.sessions().update_participant_number(&id, "u1", Estimate::Two).unwrap();

    // Same revision for every observer of the key
    assert_eq!(a.observer().state(), b.observer().state());
    assert_eq!(a.observer().state().revision(), Some(2));
    assert_eq!(c.view().value().map(|v| v.len()), Some(1));
}

#[test]
fn test_detach_and_reattach() {
    let (store, client) = test_client();
    let id = client.sessions().create_session("Sprint", "u1").unwrap();

    let a = client.watch_session(&id).unwrap();
    let b = client.watch_session(&id).unwrap();
    drop(a);
    assert_eq!(store.listener_count(), 1);
    drop(b);
    assert_eq!(store.listener_count(), 0);
    assert_eq!(client.bridge().tracked_keys(), 0);

    let again = client.watch_session(&id).unwrap();
    assert_eq!(store.listener_count(), 1);
    assert_eq!(again.observer().state().revision(), Some(1));
}

#[test]
fn test_updates_then_error_then_recovery() {
    let (store, client) = test_client();
    let id = client.sessions().create_session("Sprint", "u1").unwrap();
    let watch = client.watch_session(&id).unwrap();
    let target = watch.observer().target().clone();

    // t0: initial delivery
    assert!(watch.view().value().is_some());

    // t1: change
    client.sessions().update_reveal_status(&id, true).unwrap();
    match watch.view() {
        View::Ready { value: Some(session), stale } => {
            assert!(session.reveal);
            assert!(!stale);
        }
        other => panic!("unexpected view {:?}", other),
    }

    // t2: delivery error on the live subscription; the bridge refetches,
    // and the store is healthy, so the fresh subscription delivers at once
    store.emit_error(&target, StoreError::Subscription("connection reset".into()));
    let events = drain(watch.observer());
    assert!(matches!(events[events.len() - 2], QueryEvent::Stale { revision: 2 }));
    assert!(matches!(events[events.len() - 1], QueryEvent::Ready { revision: 3, .. }));
    assert_eq!(store.listener_count(), 1);

    match watch.view() {
        View::Ready { value: Some(session), stale: false } => assert!(session.reveal),
        other => panic!("unexpected view {:?}", other),
    }
}

#[test]
fn test_outage_surfaces_error_after_failed_refetch() {
    let (store, client) = test_client();
    let id = client.sessions().create_session("Sprint", "u1").unwrap();
    let watch = client.watch_session(&id).unwrap();
    drain(watch.observer());

    store.set_available(false);

    let events = drain(watch.observer());
    assert!(matches!(events[0], QueryEvent::Stale { .. }));
    assert!(matches!(events[1], QueryEvent::Failed { error: StoreError::Subscription(_) }));
    assert!(matches!(watch.view(), View::Error(StoreError::Subscription(_))));
    assert_eq!(client.bridge().active_subscriptions(), 0);

    // A new observer retries once the store is back
    store.set_available(true);
    let retry = client.watch_session(&id).unwrap();
    assert!(retry.view().value().is_some());
    assert!(watch.view().value().is_some());
    assert_eq!(store.listener_count(), 1);
}

#[test]
fn test_missing_document_is_ready_with_none() {
    let (_store, client) = test_client();
    let watch = client
        .watch_session(&planning_poker::DocumentId::from("nope"))
        .unwrap();
    assert_eq!(watch.view(), View::Ready { value: None, stale: false });
}

#[test]
fn test_first_load_while_offline_rejects() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.set_available(false);
    let bridge = SubscriptionBridge::new(store.clone(), BridgeConfig::default());

    let observer = bridge.attach(Target::document("sessions", "s1")).unwrap();
    assert!(matches!(observer.wait_ready(), Err(StoreError::Subscription(_))));
    assert!(matches!(observer.state(), QueryState::Error(_)));
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn test_writes_from_other_threads_reach_observers() {
    let (_store, client) = test_client();
    let id = client.sessions().create_session("Sprint", "u0").unwrap();
    let watch = client.watch_session(&id).unwrap();
    drain(watch.observer());

    let api = client.sessions().clone();
    let writer = {
        let id = id.clone();
        thread::spawn(move || {
            for i in 1..=4 {
                api.join_session(&id, &format!("u{}", i)).unwrap();
            }
        })
    };
    writer.join().unwrap();

    let mut last = None;
    while let Ok(event) = watch.observer().recv_timeout(Duration::from_millis(50)) {
        last = Some(event);
    }
    match last {
        Some(QueryEvent::Ready { data, .. }) => {
            let session: Option<planning_poker::Session> = data.decode_document().unwrap();
            assert_eq!(session.unwrap().participants.len(), 5);
        }
        other => panic!("unexpected last event {:?}", other),
    }
}

#[test]
fn test_clear_forgets_all_keys() {
    let (store, client) = test_client();
    let id = client.sessions().create_session("Sprint", "u1").unwrap();
    let target = Target::from(SessionApi::session_ref(&id));
    let observer = client.bridge().attach(target.clone()).unwrap();

    client.bridge().clear();
    assert_eq!(store.listener_count(), 0);
    assert_eq!(client.bridge().state(&target).unwrap(), None);
    assert!(matches!(observer.state(), QueryState::Error(StoreError::Bridge(_))));

    // Still usable after clear
    let fresh = client.bridge().attach(target.clone()).unwrap();
    assert!(matches!(
        fresh.state().data().map(|d| (**d).clone()),
        Some(Snapshot::Document(Some(_)))
    ));
    assert!(store.get(&SessionApi::session_ref(&id)).unwrap().is_some());
}
