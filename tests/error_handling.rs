//! Error handling and edge case tests.

use planning_poker::{
    DocRef, DocumentId, DocumentStore, Estimate, Fields, MemoryStore, Participant, SessionApi,
    StoreError,
};
use serde_json::json;
use std::sync::Arc;

fn test_api() -> (Arc<MemoryStore>, SessionApi) {
    let store = Arc::new(MemoryStore::new());
    let api = SessionApi::new(store.clone());
    (store, api)
}

// --- Missing Documents ---

#[test]
fn test_every_mutation_reports_missing_session() {
    let (_store, api) = test_api();
    let id = DocumentId::from("missing");
    let expected = StoreError::SessionNotFound(id.clone());

    assert_eq!(api.get_session(&id).unwrap_err(), expected);
    assert_eq!(api.add_participant(&id, Participant::new("u1")).unwrap_err(), expected);
    assert_eq!(api.join_session(&id, "u1").unwrap_err(), expected);
    assert_eq!(
        api.update_participant_number(&id, "u1", Estimate::One).unwrap_err(),
        expected
    );
    assert_eq!(api.toggle_observer_status(&id, "u1").unwrap_err(), expected);
    assert_eq!(api.update_reveal_status(&id, false).unwrap_err(), expected);
    assert_eq!(api.reset_reveal_and_numbers(&id).unwrap_err(), expected);
}

#[test]
fn test_session_deleted_between_read_and_write() {
    let (store, api) = test_api();
    let id = api.create_session("Sprint", "u1").unwrap();
    store.delete(&SessionApi::session_ref(&id)).unwrap();

    assert!(matches!(
        api.toggle_observer_status(&id, "u1"),
        Err(StoreError::SessionNotFound(_))
    ));
    // Update of a user that was never created
    assert!(matches!(
        api.update_user(&DocumentId::from("u9"), Fields::new()),
        Err(StoreError::NotFound(DocRef { .. }))
    ));
}

#[test]
fn test_missing_participant() {
    let (_store, api) = test_api();
    let id = api.create_session("Sprint", "u1").unwrap();

    let err = api.toggle_observer_status(&id, "u2").unwrap_err();
    assert_eq!(
        err,
        StoreError::ParticipantNotFound {
            session: id.clone(),
            participant: "u2".to_string(),
        }
    );
    // Nothing was written
    assert_eq!(api.get_session(&id).unwrap().participants.len(), 1);
}

// --- Malformed Documents ---

#[test]
fn test_malformed_participants_rejected_at_boundary() {
    let (store, api) = test_api();
    let id = DocumentId::from("bad");
    let mut fields = Fields::new();
    fields.insert("sessionName".into(), json!("Sprint"));
    fields.insert("participants".into(), json!([{"id": "u1", "number": 13}]));
    store.set(&SessionApi::session_ref(&id), fields, false).unwrap();

    let err = api.update_participant_number(&id, "u1", Estimate::Two).unwrap_err();
    assert!(matches!(err, StoreError::InvalidDocument { .. }));
}

#[test]
fn test_legacy_glyph_votes_are_read() {
    let (store, api) = test_api();
    let id = DocumentId::from("legacy");
    let mut fields = Fields::new();
    fields.insert("sessionName".into(), json!("Sprint"));
    fields.insert(
        "participants".into(),
        json!([{"id": "u1", "number": "☕"}, {"id": "u2", "number": "?"}]),
    );
    store.set(&SessionApi::session_ref(&id), fields, false).unwrap();

    let session = api.get_session(&id).unwrap();
    assert_eq!(session.participants[0].number, Some(Estimate::NeedsBreak));
    assert_eq!(session.participants[1].number, Some(Estimate::Unknown));
}

// --- Store Outages ---

#[test]
fn test_outage_propagates_to_callers() {
    let (store, api) = test_api();
    let id = api.create_session("Sprint", "u1").unwrap();

    store.set_available(false);
    assert!(matches!(api.get_session(&id), Err(StoreError::Unavailable(_))));
    assert!(matches!(
        api.update_reveal_status(&id, true),
        Err(StoreError::Unavailable(_))
    ));
    assert!(matches!(
        api.create_session("Other", "u1"),
        Err(StoreError::Unavailable(_))
    ));

    store.set_available(true);
    assert!(!api.get_session(&id).unwrap().reveal);
}
