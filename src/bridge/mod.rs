//! Subscription-to-cache bridge.
//!
//! Turns the store's push-based subscriptions into pull-based cache entries:
//! - One store subscription per distinct query key, however many observers
//! - A shared first-load promise while the key is loading
//! - In-place cache updates (and observer events) on every later delivery
//! - Stale-and-refetch when a live subscription fails
//! - Subscription teardown when the last observer detaches
//!
//! # Example
//!
//! ```ignore
//! let bridge = SubscriptionBridge::new(store, BridgeConfig::default());
//!
//! let observer = bridge.attach(Target::document("sessions", "s1"))?;
//! let first = observer.wait_ready()?;
//!
//! loop {
//!     match observer.recv() {
//!         Ok(QueryEvent::Ready { data, .. }) => render(&data),
//!         Ok(QueryEvent::Stale { .. }) => show_reconnecting(),
//!         Ok(QueryEvent::Failed { error }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod key;
mod manager;
mod types;

pub use key::QueryKey;
pub use manager::{Observer, SubscriptionBridge};
pub use types::{BridgeConfig, FirstLoad, ObserverId, QueryEvent, QueryState};
