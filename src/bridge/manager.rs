//! Subscription-to-cache bridge.

use crate::error::{Result, StoreError};
use crate::store::{Delivery, DocumentStore, Listener, Unsubscribe};
use crate::types::{Snapshot, Target};
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::key::QueryKey;
use super::types::{BridgeConfig, FirstLoad, ObserverId, QueryEvent, QueryState};

/// Cache entry and subscription bookkeeping for one query key.
struct Entry {
    target: Target,
    state: QueryState,
    /// Promise for the current load cycle. Re-created only when retrying
    /// from an error, never for live updates or stale refetches.
    first_load: FirstLoad,
    observers: HashMap<ObserverId, Sender<QueryEvent>>,
    /// Generation of the store subscription this entry listens to.
    generation: u64,
    /// Whether the current generation has delivered anything yet.
    delivered: bool,
    /// Whether the current generation's handle should be kept once the
    /// store returns it. Cleared when the subscription fails.
    retain: bool,
    unsubscribe: Option<Unsubscribe>,
    revision: u64,
}

impl Entry {
    fn new(target: Target, generation: u64) -> Self {
        Self {
            target,
            state: QueryState::Loading,
            first_load: FirstLoad::new(),
            observers: HashMap::new(),
            generation,
            delivered: false,
            retain: true,
            unsubscribe: None,
            revision: 0,
        }
    }

    /// Switch to a new store subscription. Returns the old handle, which the
    /// caller must close before opening the new one.
    fn begin_generation(&mut self, generation: u64) -> Option<Unsubscribe> {
        self.generation = generation;
        self.delivered = false;
        self.retain = true;
        self.unsubscribe.take()
    }

    fn broadcast(&self, key: &QueryKey, event: QueryEvent) {
        for (id, sender) in &self.observers {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(key = %key, observer = id.0, "observer buffer full, event skipped");
                }
                // Receiver gone; the observer's drop detaches it
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// A subscription to (re)open once the entries lock is released.
struct PendingOpen {
    key: QueryKey,
    target: Target,
    generation: u64,
    previous: Option<Unsubscribe>,
}

pub(crate) struct BridgeInner {
    store: Arc<dyn DocumentStore>,
    config: BridgeConfig,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    next_observer: AtomicU64,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
}

impl BridgeInner {
    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Open a store subscription for one generation of a key.
    ///
    /// Never called with the entries lock held: the store may deliver
    /// synchronously from inside `subscribe`.
    fn open(inner: &Arc<Self>, pending: PendingOpen) {
        let PendingOpen {
            key,
            target,
            generation,
            previous,
        } = pending;

        if let Some(previous) = previous {
            trace!(key = %key, "closing superseded subscription");
            previous.call();
        }

        debug!(key = %key, generation, "opening store subscription");
        let weak = Arc::downgrade(inner);
        let listener_key = key.clone();
        let listener: Listener = Arc::new(move |delivery: Delivery| {
            if let Some(inner) = weak.upgrade() {
                Self::deliver(&inner, &listener_key, generation, delivery);
            }
        });

        match inner.store.subscribe(&target, listener) {
            Ok(handle) => inner.adopt(&key, generation, handle),
            Err(error) => Self::deliver(inner, &key, generation, Err(error)),
        }
    }

    /// Store the handle returned by `subscribe`, or close it right away if
    /// the key was detached or moved on in the meantime.
    fn adopt(&self, key: &QueryKey, generation: u64, handle: Unsubscribe) {
        let rejected = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry)
                    if entry.generation == generation
                        && entry.retain
                        && entry.unsubscribe.is_none() =>
                {
                    entry.unsubscribe = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };
        if let Some(handle) = rejected {
            trace!(key = %key, generation, "discarding handle of abandoned subscription");
            handle.call();
        }
    }

    /// Apply one store delivery to the cache.
    fn deliver(inner: &Arc<Self>, key: &QueryKey, generation: u64, delivery: Delivery) {
        let mut close = None;
        let mut reopen = None;

        {
            let mut entries = inner.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                trace!(key = %key, "delivery for detached key discarded");
                return;
            };
            if entry.generation != generation {
                trace!(key = %key, generation, "delivery from superseded subscription discarded");
                return;
            }

            let first = !entry.delivered;
            entry.delivered = true;

            match delivery {
                Ok(snapshot) => {
                    entry.revision += 1;
                    let data = Arc::new(snapshot);
                    entry.state = QueryState::Ready {
                        data: Arc::clone(&data),
                        revision: entry.revision,
                        stale: false,
                    };
                    entry.first_load.settle(Ok(Arc::clone(&data)));
                    entry.broadcast(
                        key,
                        QueryEvent::Ready {
                            data,
                            revision: entry.revision,
                        },
                    );
                }
                Err(error) if first => {
                    debug!(key = %key, error = %error, "query failed before first delivery");
                    entry.state = QueryState::Error(error.clone());
                    entry.first_load.settle(Err(error.clone()));
                    entry.retain = false;
                    close = entry.unsubscribe.take();
                    entry.broadcast(key, QueryEvent::Failed { error });
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "live subscription failed, refetching");
                    if let QueryState::Ready { stale, .. } = &mut entry.state {
                        *stale = true;
                    }
                    entry.broadcast(
                        key,
                        QueryEvent::Stale {
                            revision: entry.revision,
                        },
                    );
                    let generation = inner.next_generation();
                    reopen = Some(PendingOpen {
                        key: key.clone(),
                        target: entry.target.clone(),
                        generation,
                        previous: entry.begin_generation(generation),
                    });
                }
            }
        }

        if let Some(handle) = close {
            handle.call();
        }
        if let Some(pending) = reopen {
            Self::open(inner, pending);
        }
    }

    fn detach(&self, key: &QueryKey, id: ObserverId) {
        let close = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.observers.remove(&id);
            if !entry.observers.is_empty() {
                return;
            }
            entries.remove(key).and_then(|entry| entry.unsubscribe)
        };

        debug!(key = %key, "last observer detached");
        if let Some(handle) = close {
            handle.call();
        }
    }

    fn state(&self, key: &QueryKey) -> Option<QueryState> {
        self.entries.lock().get(key).map(|e| e.state.clone())
    }

    fn drain(&self) {
        let handles: Vec<Unsubscribe> = {
            let mut entries = self.entries.lock();
            entries
                .drain()
                .filter_map(|(_, entry)| entry.unsubscribe)
                .collect()
        };
        if !handles.is_empty() {
            debug!(count = handles.len(), "closing all store subscriptions");
        }
        for handle in handles {
            handle.call();
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Gives synchronous, cached access to realtime store data.
///
/// One store subscription is open per distinct query key, shared by all of
/// the key's observers. The subscription closes when the last observer
/// detaches; re-attaching opens a fresh one.
///
/// Per key: `Loading` until the first delivery, then `Ready` (updated in
/// place on every delivery) or `Error`. A failure after the first delivery
/// marks the data stale and re-opens the subscription; only if that refetch
/// fails does the key move to `Error`.
#[derive(Clone)]
pub struct SubscriptionBridge {
    inner: Arc<BridgeInner>,
}

impl SubscriptionBridge {
    /// Create a bridge over a store.
    pub fn new(store: Arc<dyn DocumentStore>, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                store,
                config,
                entries: Mutex::new(HashMap::new()),
                next_observer: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Attach an observer to a document or query.
    ///
    /// The first observer of a key opens the store subscription. Attaching
    /// to a key in the error state retries it with a fresh subscription.
    pub fn attach(&self, target: impl Into<Target>) -> Result<Observer> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(StoreError::Bridge("bridge has been shut down".into()));
        }

        let target = target.into();
        let key = QueryKey::for_target(&target)?;
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.inner.config.event_buffer_size.max(1));

        let (first_load, pending) = {
            let mut entries = self.inner.entries.lock();
            match entries.entry(key.clone()) {
                MapEntry::Occupied(occupied) => {
                    let entry = occupied.into_mut();
                    entry.observers.insert(id, sender);
                    let mut pending = None;
                    if matches!(entry.state, QueryState::Error(_)) {
                        debug!(key = %key, "retrying errored query");
                        entry.state = QueryState::Loading;
                        entry.first_load = FirstLoad::new();
                        let generation = self.inner.next_generation();
                        pending = Some(PendingOpen {
                            key: key.clone(),
                            target: entry.target.clone(),
                            generation,
                            previous: entry.begin_generation(generation),
                        });
                    }
                    (entry.first_load.clone(), pending)
                }
                MapEntry::Vacant(vacant) => {
                    let generation = self.inner.next_generation();
                    let mut entry = Entry::new(target.clone(), generation);
                    entry.observers.insert(id, sender);
                    let first_load = entry.first_load.clone();
                    vacant.insert(entry);
                    (
                        first_load,
                        Some(PendingOpen {
                            key: key.clone(),
                            target: target.clone(),
                            generation,
                            previous: None,
                        }),
                    )
                }
            }
        };

        trace!(key = %key, observer = id.0, "observer attached");
        if let Some(pending) = pending {
            BridgeInner::open(&self.inner, pending);
        }

        Ok(Observer {
            id,
            key,
            target,
            first_load,
            receiver,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Force a fresh store subscription for a tracked key.
    ///
    /// Ready data is kept but flagged stale until the new subscription
    /// delivers. Untracked keys are ignored.
    pub fn refetch(&self, target: &Target) -> Result<()> {
        let key = QueryKey::for_target(target)?;
        let pending = {
            let mut entries = self.inner.entries.lock();
            let Some(entry) = entries.get_mut(&key) else {
                return Ok(());
            };
            match &mut entry.state {
                QueryState::Ready { stale, .. } => *stale = true,
                QueryState::Error(_) => {
                    entry.state = QueryState::Loading;
                    entry.first_load = FirstLoad::new();
                }
                QueryState::Loading => {}
            }
            let generation = self.inner.next_generation();
            PendingOpen {
                key: key.clone(),
                target: entry.target.clone(),
                generation,
                previous: entry.begin_generation(generation),
            }
        };
        BridgeInner::open(&self.inner, pending);
        Ok(())
    }

    /// Cached state of a key; `None` if nothing observes it.
    pub fn state(&self, target: &Target) -> Result<Option<QueryState>> {
        let key = QueryKey::for_target(target)?;
        Ok(self.inner.state(&key))
    }

    /// Number of keys with an open store subscription.
    pub fn active_subscriptions(&self) -> usize {
        self.inner
            .entries
            .lock()
            .values()
            .filter(|e| e.unsubscribe.is_some())
            .count()
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn observer_count(&self, target: &Target) -> Result<usize> {
        let key = QueryKey::for_target(target)?;
        Ok(self
            .inner
            .entries
            .lock()
            .get(&key)
            .map(|e| e.observers.len())
            .unwrap_or(0))
    }

    /// Close every store subscription and forget all cached data.
    ///
    /// The bridge stays usable; existing observers see their key as cleared.
    pub fn clear(&self) {
        self.inner.drain();
    }

    /// `clear`, then reject further attachments.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.drain();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

/// An attached observer of one query key. Detaches on drop.
pub struct Observer {
    id: ObserverId,
    key: QueryKey,
    target: Target,
    first_load: FirstLoad,
    receiver: Receiver<QueryEvent>,
    inner: Arc<BridgeInner>,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Current cached state of this observer's key.
    pub fn state(&self) -> QueryState {
        self.inner.state(&self.key).unwrap_or_else(|| {
            QueryState::Error(StoreError::Bridge("query was cleared".into()))
        })
    }

    /// Promise for the first delivery seen by this observer.
    pub fn first_load(&self) -> &FirstLoad {
        &self.first_load
    }

    /// Block for the first load, up to the configured timeout.
    pub fn wait_ready(&self) -> Result<Arc<Snapshot>> {
        let timeout = self.inner.config.first_load_timeout();
        self.wait_ready_timeout(timeout)
    }

    pub fn wait_ready_timeout(&self, timeout: Duration) -> Result<Arc<Snapshot>> {
        self.first_load.wait_timeout(timeout).unwrap_or_else(|| {
            Err(StoreError::Bridge(format!(
                "first load of {} timed out after {:?}",
                self.key, timeout
            )))
        })
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<QueryEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<QueryEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<QueryEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Detach now rather than at drop.
    pub fn detach(self) {}
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.inner.detach(&self.key, self.id);
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
