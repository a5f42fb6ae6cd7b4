//! Error types for the planning poker store and sync layer.

use crate::types::{DocRef, DocumentId};
use thiserror::Error;

/// Main error type for store, bridge and session operations.
///
/// `Clone` so a single subscription failure can be handed to every observer
/// of a query key.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(DocRef),

    #[error("Session not found: {0}")]
    SessionNotFound(DocumentId),

    #[error("Participant {participant} not found in session {session}")]
    ParticipantNotFound {
        session: DocumentId,
        participant: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid document {doc}: {reason}")]
    InvalidDocument { doc: DocRef, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Bridge error: {0}")]
    Bridge(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

impl StoreError {
    /// Re-label a generic `NotFound` as a missing session.
    pub(crate) fn for_session(self, session: &DocumentId) -> Self {
        match self {
            StoreError::NotFound(_) => StoreError::SessionNotFound(session.clone()),
            other => other,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
