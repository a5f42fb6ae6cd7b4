//! Planning poker sessions.
//!
//! Document shapes (`Session`, `Participant`, `User`, the `Estimate` deck)
//! and the mutation API layered over the document store.

mod api;
mod model;

pub use api::{SessionApi, DEFAULT_BG_COLOR, SESSIONS, USERS};
pub use model::{CardFace, Estimate, Participant, Session, SessionSummary, User, VoteCard};
