//! # Planning Poker
//!
//! Realtime planning poker sessions on top of a push-based document store.
//!
//! ## Core Concepts
//!
//! - **Store**: typed adapter over an external document database with
//!   read/write/subscribe primitives (`DocumentStore`, `MemoryStore`)
//! - **Bridge**: one shared store subscription per query key, exposed as a
//!   synchronously readable cache with observer events
//! - **Sessions**: read-modify-write mutations for joining, voting,
//!   observing, revealing and resetting a round
//!
//! ## Example
//!
//! ```ignore
//! use planning_poker::{ClientConfig, Estimate, MemoryStore, PokerClient};
//! use std::sync::Arc;
//!
//! let client = PokerClient::init(Arc::new(MemoryStore::new()), ClientConfig::default());
//!
//! let id = client.sessions().create_session("Sprint 12", "u1")?;
//! let watch = client.watch_session(&id)?;
//!
//! client.sessions().join_session(&id, "u2")?;
//! client.sessions().update_participant_number(&id, "u2", Estimate::Five)?;
//! client.sessions().update_reveal_status(&id, true)?;
//!
//! if let Some(Some(session)) = watch.view().value() {
//!     println!("{} voters", session.voters().count());
//! }
//! ```

pub mod bridge;
pub mod client;
pub mod error;
pub mod session;
pub mod store;
pub mod types;

// Re-exports
pub use bridge::{
    BridgeConfig, FirstLoad, Observer, ObserverId, QueryEvent, QueryKey, QueryState,
    SubscriptionBridge,
};
pub use client::{ClientConfig, FromSnapshot, PokerClient, View, Watch};
pub use error::{Result, StoreError};
pub use session::{
    CardFace, Estimate, Participant, Session, SessionApi, SessionSummary, User, VoteCard,
};
pub use store::{Delivery, DocumentStore, Listener, MemoryStore, Unsubscribe};
pub use types::*;
