//! Client façade wiring the store, the bridge and the session API.

use crate::bridge::{BridgeConfig, Observer, QueryState, SubscriptionBridge};
use crate::error::{Result, StoreError};
use crate::session::{Session, SessionApi, User, DEFAULT_BG_COLOR, SESSIONS, USERS};
use crate::store::DocumentStore;
use crate::types::{DocRef, DocumentId, Snapshot, Target};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub bridge: BridgeConfig,

    /// Card colour for participants added by `join_session`.
    /// Default: "bg-red-600"
    pub default_bg_color: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            default_bg_color: DEFAULT_BG_COLOR.to_string(),
        }
    }
}

/// Typed decoding of a bridge snapshot.
pub trait FromSnapshot: Sized {
    fn from_snapshot(snapshot: &Snapshot) -> Result<Self>;
}

impl<T: DeserializeOwned> FromSnapshot for Option<T> {
    fn from_snapshot(snapshot: &Snapshot) -> Result<Self> {
        snapshot.decode_document()
    }
}

impl<T: DeserializeOwned> FromSnapshot for Vec<T> {
    fn from_snapshot(snapshot: &Snapshot) -> Result<Self> {
        snapshot.decode_collection()
    }
}

/// Display state of a typed watch.
#[derive(Clone, Debug, PartialEq)]
pub enum View<T> {
    Loading,
    Ready { value: T, stale: bool },
    Error(StoreError),
}

impl<T> View<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            View::Ready { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// A bridge observer that decodes its data as `T`.
pub struct Watch<T> {
    observer: Observer,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromSnapshot> Watch<T> {
    fn new(observer: Observer) -> Self {
        Self {
            observer,
            _marker: PhantomData,
        }
    }

    /// Current display state. A document that fails validation shows as an error.
    pub fn view(&self) -> View<T> {
        match self.observer.state() {
            QueryState::Loading => View::Loading,
            QueryState::Error(e) => View::Error(e),
            QueryState::Ready { data, stale, .. } => match T::from_snapshot(&data) {
                Ok(value) => View::Ready { value, stale },
                Err(e) => View::Error(e),
            },
        }
    }

    /// Block for the first load and decode it.
    pub fn wait(&self) -> Result<T> {
        let data = self.observer.wait_ready()?;
        T::from_snapshot(&data)
    }

    /// Underlying observer, for event streaming.
    pub fn observer(&self) -> &Observer {
        &self.observer
    }
}

/// Planning poker client.
///
/// Owns the process-wide subscription bridge. Create with `init` at start-up
/// and call `teardown` on shutdown (or between tests).
pub struct PokerClient {
    bridge: SubscriptionBridge,
    sessions: SessionApi,
}

impl PokerClient {
    pub fn init(store: Arc<dyn DocumentStore>, config: ClientConfig) -> Self {
        debug!(?config, "initializing poker client");
        let bridge = SubscriptionBridge::new(Arc::clone(&store), config.bridge);
        let sessions = SessionApi::new(store).with_bg_color(config.default_bg_color);
        Self { bridge, sessions }
    }

    pub fn sessions(&self) -> &SessionApi {
        &self.sessions
    }

    pub fn bridge(&self) -> &SubscriptionBridge {
        &self.bridge
    }

    /// Live view of one session. `None` while the document does not exist.
    pub fn watch_session(&self, id: &DocumentId) -> Result<Watch<Option<Session>>> {
        let target = Target::Document(DocRef::new(SESSIONS, id.clone()));
        Ok(Watch::new(self.bridge.attach(target)?))
    }

    /// Live list of all sessions, newest first.
    pub fn watch_sessions(&self) -> Result<Watch<Vec<Session>>> {
        Ok(Watch::new(self.bridge.attach(SessionApi::sessions_query())?))
    }

    pub fn watch_user(&self, id: &DocumentId) -> Result<Watch<Option<User>>> {
        let target = Target::Document(DocRef::new(USERS, id.clone()));
        Ok(Watch::new(self.bridge.attach(target)?))
    }

    /// Close every subscription and refuse new ones.
    pub fn teardown(&self) {
        debug!("tearing down poker client");
        self.bridge.shutdown();
    }
}
