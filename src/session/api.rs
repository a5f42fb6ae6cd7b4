//! Read-modify-write operations on session documents.
//!
//! Each mutation reads the current session, validates, computes the new
//! state in memory and writes whole fields back: the full `participants`
//! array, never a partial path inside it. Two concurrent mutations of the
//! same session can race and the later write wins.

use super::model::{Estimate, Participant, Session, User};
use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use crate::types::{DocRef, DocumentId, Direction, Fields, Query, CREATED_AT_FIELD};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Collection holding one document per session.
pub const SESSIONS: &str = "sessions";

/// Collection holding one document per user account.
pub const USERS: &str = "users";

/// Default card colour given to joining participants.
pub const DEFAULT_BG_COLOR: &str = "bg-red-600";

/// Mutation and lookup API for sessions and users.
#[derive(Clone)]
pub struct SessionApi {
    store: Arc<dyn DocumentStore>,
    default_bg_color: String,
}

impl SessionApi {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            default_bg_color: DEFAULT_BG_COLOR.to_string(),
        }
    }

    pub fn with_bg_color(mut self, color: impl Into<String>) -> Self {
        self.default_bg_color = color.into();
        self
    }

    pub fn session_ref(id: &DocumentId) -> DocRef {
        DocRef::new(SESSIONS, id.clone())
    }

    pub fn user_ref(id: &DocumentId) -> DocRef {
        DocRef::new(USERS, id.clone())
    }

    /// All sessions, newest first.
    pub fn sessions_query() -> Query {
        Query::collection(SESSIONS).order_by(CREATED_AT_FIELD, Direction::Descending)
    }

    // --- Sessions ---

    /// Create a session with the creator as its first, voting participant.
    pub fn create_session(&self, name: &str, creator_id: &str) -> Result<DocumentId> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidArgument("session name must not be empty".into()));
        }
        if creator_id.is_empty() {
            return Err(StoreError::InvalidArgument("creator id must not be empty".into()));
        }

        let creator = Participant::new(creator_id).with_bg_color(self.default_bg_color.clone());
        let mut fields = Fields::new();
        fields.insert("sessionName".into(), Value::from(name));
        fields.insert("reveal".into(), Value::Bool(false));
        fields.insert("participants".into(), serde_json::to_value(vec![creator])?);

        let doc = self.store.create(SESSIONS, fields)?;
        debug!(session = %doc.id(), creator = creator_id, "session created");
        Ok(doc.id().clone())
    }

    /// Read and validate a session.
    pub fn get_session(&self, id: &DocumentId) -> Result<Session> {
        let doc = self
            .store
            .get(&Self::session_ref(id))?
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))?;
        doc.decode()
    }

    /// Every session, newest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.store
            .query(&Self::sessions_query())?
            .iter()
            .map(|d| d.decode())
            .collect()
    }

    /// Sessions the user participates in, newest first.
    pub fn list_sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let mut sessions = self.list_sessions()?;
        sessions.retain(|s| s.has_participant(user_id));
        Ok(sessions)
    }

    /// Append a participant unless one with the same id is already present.
    ///
    /// Returns whether the participant was added.
    pub fn add_participant(&self, id: &DocumentId, participant: Participant) -> Result<bool> {
        let mut session = self.get_session(id)?;
        if session.has_participant(&participant.id) {
            return Ok(false);
        }
        debug!(session = %id, participant = %participant.id, "adding participant");
        session.participants.push(participant);
        self.write_participants(id, &session.participants)?;
        Ok(true)
    }

    /// Join a session as a voting participant with the default card colour.
    pub fn join_session(&self, id: &DocumentId, user_id: &str) -> Result<bool> {
        let participant = Participant::new(user_id).with_bg_color(self.default_bg_color.clone());
        self.add_participant(id, participant)
    }

    /// Record a participant's estimate. Leaves `reveal` untouched.
    pub fn update_participant_number(
        &self,
        id: &DocumentId,
        participant_id: &str,
        value: Estimate,
    ) -> Result<()> {
        let mut session = self.get_session(id)?;
        let participant = find_mut(&mut session, participant_id)?;
        participant.number = Some(value);
        debug!(session = %id, participant = participant_id, "vote recorded");
        self.write_participants(id, &session.participants)
    }

    /// Flip a participant's observer flag. Returns the new value.
    pub fn toggle_observer_status(&self, id: &DocumentId, participant_id: &str) -> Result<bool> {
        let mut session = self.get_session(id)?;
        let participant = find_mut(&mut session, participant_id)?;
        participant.observer = !participant.observer;
        let observer = participant.observer;
        self.write_participants(id, &session.participants)?;
        Ok(observer)
    }

    /// Show or hide all votes. Single-field write.
    pub fn update_reveal_status(&self, id: &DocumentId, revealed: bool) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert("reveal".into(), Value::Bool(revealed));
        self.store
            .update(&Self::session_ref(id), fields)
            .map_err(|e| e.for_session(id))?;
        debug!(session = %id, revealed, "reveal status updated");
        Ok(())
    }

    /// `update_reveal_status` for untyped input; rejects anything but a boolean.
    pub fn update_reveal_status_value(&self, id: &DocumentId, revealed: &Value) -> Result<()> {
        match revealed {
            Value::Bool(b) => self.update_reveal_status(id, *b),
            other => Err(StoreError::InvalidArgument(format!(
                "reveal status should be a boolean, got {}",
                other
            ))),
        }
    }

    /// Clear every participant's estimate and hide votes, in one write.
    pub fn reset_reveal_and_numbers(&self, id: &DocumentId) -> Result<()> {
        let mut session = self.get_session(id)?;
        for participant in &mut session.participants {
            participant.number = None;
        }

        let mut fields = Fields::new();
        fields.insert("reveal".into(), Value::Bool(false));
        fields.insert("participants".into(), serde_json::to_value(&session.participants)?);
        self.store
            .update(&Self::session_ref(id), fields)
            .map_err(|e| e.for_session(id))?;
        debug!(session = %id, "round reset");
        Ok(())
    }

    fn write_participants(&self, id: &DocumentId, participants: &[Participant]) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert("participants".into(), serde_json::to_value(participants)?);
        self.store
            .update(&Self::session_ref(id), fields)
            .map_err(|e| e.for_session(id))
    }

    // --- Users ---

    pub fn get_user(&self, id: &DocumentId) -> Result<Option<User>> {
        self.store
            .get(&Self::user_ref(id))?
            .map(|d| d.decode())
            .transpose()
    }

    /// Create or merge into a user document.
    pub fn create_user(&self, id: &DocumentId, fields: Fields) -> Result<()> {
        self.store.set(&Self::user_ref(id), fields, true)
    }

    /// Update fields of an existing user.
    pub fn update_user(&self, id: &DocumentId, fields: Fields) -> Result<()> {
        self.store.update(&Self::user_ref(id), fields)
    }
}

fn find_mut<'a>(session: &'a mut Session, participant_id: &str) -> Result<&'a mut Participant> {
    let session_id = session.id.clone();
    session
        .participants
        .iter_mut()
        .find(|p| p.id == participant_id)
        .ok_or_else(|| StoreError::ParticipantNotFound {
            session: session_id,
            participant: participant_id.to_string(),
        })
}
