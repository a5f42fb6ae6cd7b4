//! Bridge types: configuration, observable query state and events.

use crate::error::{Result, StoreError};
use crate::types::Snapshot;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for a subscription bridge.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Max buffered events per observer. A full buffer skips events; the
    /// cached state stays readable through `Observer::state`.
    /// Default: 256
    pub event_buffer_size: usize,

    /// How long `Observer::wait_ready` blocks for the first delivery.
    /// Default: 10s
    pub first_load_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            first_load_timeout_ms: 10_000,
        }
    }
}

impl BridgeConfig {
    pub fn first_load_timeout(&self) -> Duration {
        Duration::from_millis(self.first_load_timeout_ms)
    }
}

/// Unique identifier for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// What an observer of a query key can display.
///
/// The three states are mutually exclusive. Data kept across a failed live
/// subscription is flagged `stale` until a refetch succeeds.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryState {
    /// No data delivered yet.
    Loading,
    /// Data present.
    Ready {
        data: Arc<Snapshot>,
        revision: u64,
        stale: bool,
    },
    /// The first load (or a refetch) failed.
    Error(StoreError),
}

impl QueryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, QueryState::Ready { stale: true, .. })
    }

    pub fn data(&self) -> Option<&Arc<Snapshot>> {
        match self {
            QueryState::Ready { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StoreError> {
        match self {
            QueryState::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn revision(&self) -> Option<u64> {
        match self {
            QueryState::Ready { revision, .. } => Some(*revision),
            _ => None,
        }
    }
}

/// Events pushed to observers of a query key.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    /// New data: first load, a live update, or a successful refetch.
    Ready { data: Arc<Snapshot>, revision: u64 },

    /// The live subscription failed; cached data is stale and a refetch is
    /// under way.
    Stale { revision: u64 },

    /// The first load or the refetch failed.
    Failed { error: StoreError },
}

struct FirstLoadInner {
    slot: Mutex<Option<Result<Arc<Snapshot>>>>,
    settled: Condvar,
}

/// One-shot promise for the first delivery of a query key.
///
/// Every observer attached while the key is loading shares the same
/// instance. Settling is idempotent: only the first result sticks.
#[derive(Clone)]
pub struct FirstLoad {
    inner: Arc<FirstLoadInner>,
}

impl FirstLoad {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(FirstLoadInner {
                slot: Mutex::new(None),
                settled: Condvar::new(),
            }),
        }
    }

    /// Resolve or reject. Returns false if already settled.
    pub(crate) fn settle(&self, result: Result<Arc<Snapshot>>) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        self.inner.settled.notify_all();
        true
    }

    pub fn is_settled(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    /// Result if already settled (non-blocking).
    pub fn try_get(&self) -> Option<Result<Arc<Snapshot>>> {
        self.inner.slot.lock().clone()
    }

    /// Block until settled.
    pub fn wait(&self) -> Result<Arc<Snapshot>> {
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.inner.settled.wait(&mut slot);
        }
    }

    /// Block until settled or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<Snapshot>>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            if self.inner.settled.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }
}

impl fmt::Debug for FirstLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.slot.lock() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        write!(f, "FirstLoad({})", state)
    }
}
