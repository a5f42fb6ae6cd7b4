//! In-process document store with push-based change notification.

use super::{Delivery, DocumentStore, Listener, Unsubscribe};
use crate::error::{Result, StoreError};
use crate::types::{
    DocRef, Document, DocumentId, Fields, Query, Snapshot, Target, Timestamp, CREATED_AT_FIELD,
};
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Length of generated document ids (hex chars).
const GENERATED_ID_LEN: usize = 20;

type Collections = HashMap<String, BTreeMap<DocumentId, Fields>>;
type Registry = RwLock<HashMap<u64, Registration>>;

/// A registered subscription.
struct Registration {
    target: Target,
    listener: Listener,
}

/// In-memory `DocumentStore`.
///
/// Writes and subscription openings are serialized through one emit lock so
/// every listener sees deliveries in write order. The lock is re-entrant:
/// a listener may write to the store or open/close subscriptions from inside
/// its callback.
pub struct MemoryStore {
    /// Documents by collection, then id.
    collections: RwLock<Collections>,
    /// Active subscriptions by listener id. Shared with unsubscribe handles.
    listeners: Arc<Registry>,
    /// Serializes mutation + delivery.
    emit_lock: ReentrantMutex<()>,
    next_listener: AtomicU64,
    next_doc: AtomicU64,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            emit_lock: ReentrantMutex::new(()),
            next_listener: AtomicU64::new(1),
            next_doc: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Number of open subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Simulate an outage or recovery.
    ///
    /// Going down fails every open subscription with a `Subscription` error
    /// and closes it. While down, reads and writes fail with `Unavailable` and
    /// new subscriptions deliver an error first.
    pub fn set_available(&self, available: bool) {
        let _emit = self.emit_lock.lock();
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            warn!("memory store going unavailable");
            let ids: Vec<u64> = self.listeners.read().keys().copied().collect();
            for id in ids {
                self.fail_listener(id, StoreError::Subscription("store unavailable".into()));
            }
        } else if !was && available {
            debug!("memory store available again");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Push an error to every current subscription on `target` and close them.
    pub fn emit_error(&self, target: &Target, error: StoreError) {
        let _emit = self.emit_lock.lock();
        let ids: Vec<u64> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, reg)| &reg.target == target)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.fail_listener(id, error.clone());
        }
    }

    fn fail_listener(&self, id: u64, error: StoreError) {
        let removed = self.listeners.write().remove(&id);
        if let Some(reg) = removed {
            debug!(listener = id, error = %error, "closing subscription after error");
            (reg.listener)(Err(error));
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    fn generate_id(&self, collection: &str) -> DocumentId {
        let counter = self.next_doc.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update(counter.to_le_bytes());
        hasher.update(Timestamp::now().0.to_le_bytes());
        let hex = hex::encode(hasher.finalize());
        DocumentId(hex[..GENERATED_ID_LEN].to_string())
    }

    /// Compute a snapshot of `target` from current data.
    fn snapshot(collections: &Collections, target: &Target) -> Snapshot {
        match target {
            Target::Document(doc) => Snapshot::Document(
                collections
                    .get(&doc.collection)
                    .and_then(|c| c.get(&doc.id))
                    .map(|fields| Document::new(doc.clone(), fields.clone())),
            ),
            Target::Query(query) => Snapshot::Collection(Self::run_query(collections, query)),
        }
    }

    fn run_query(collections: &Collections, query: &Query) -> Vec<Document> {
        let docs = collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|c| c.iter())
            .map(|(id, fields)| {
                Document::new(DocRef::new(query.collection.clone(), id.clone()), fields.clone())
            });
        query.apply(docs)
    }

    /// Deliver the post-write state of `doc` to every affected listener.
    ///
    /// Must be called with the emit lock held and the data lock released.
    fn notify(&self, doc: &DocRef) {
        let pending: Vec<(u64, Listener, Snapshot)> = {
            let collections = self.collections.read();
            self.listeners
                .read()
                .iter()
                .filter(|(_, reg)| reg.target.is_affected_by(doc))
                .map(|(id, reg)| {
                    (*id, Arc::clone(&reg.listener), Self::snapshot(&collections, &reg.target))
                })
                .collect()
        };

        for (id, listener, snapshot) in pending {
            // An earlier callback in this loop may have closed it
            if !self.listeners.read().contains_key(&id) {
                continue;
            }
            trace!(listener = id, doc = %doc, "delivering change");
            listener(Ok(snapshot));
        }
    }

    fn write_then_notify<F>(&self, doc: &DocRef, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Collections) -> Result<()>,
    {
        let _emit = self.emit_lock.lock();
        self.ensure_available()?;
        {
            let mut collections = self.collections.write();
            mutate(&mut collections)?;
        }
        self.notify(doc);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, doc: &DocRef) -> Result<Option<Document>> {
        self.ensure_available()?;
        let collections = self.collections.read();
        Ok(collections
            .get(&doc.collection)
            .and_then(|c| c.get(&doc.id))
            .map(|fields| Document::new(doc.clone(), fields.clone())))
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.ensure_available()?;
        Ok(Self::run_query(&self.collections.read(), query))
    }

    fn set(&self, doc: &DocRef, fields: Fields, merge: bool) -> Result<()> {
        self.write_then_notify(doc, |collections| {
            let coll = collections.entry(doc.collection.clone()).or_default();
            if merge {
                if let Some(existing) = coll.get_mut(&doc.id) {
                    merge_fields(existing, fields);
                    return Ok(());
                }
            }
            coll.insert(doc.id.clone(), fields);
            Ok(())
        })
    }

    fn update(&self, doc: &DocRef, fields: Fields) -> Result<()> {
        self.write_then_notify(doc, |collections| {
            let existing = collections
                .get_mut(&doc.collection)
                .and_then(|c| c.get_mut(&doc.id))
                .ok_or_else(|| StoreError::NotFound(doc.clone()))?;
            for (key, value) in fields {
                existing.insert(key, value);
            }
            Ok(())
        })
    }

    fn create(&self, collection: &str, mut fields: Fields) -> Result<Document> {
        let doc = DocRef::new(collection, self.generate_id(collection));
        fields.insert(CREATED_AT_FIELD.to_string(), Value::from(Timestamp::now().0));
        let stored = fields.clone();
        self.write_then_notify(&doc, |collections| {
            collections
                .entry(doc.collection.clone())
                .or_default()
                .insert(doc.id.clone(), stored);
            Ok(())
        })?;
        debug!(doc = %doc, "created document");
        Ok(Document::new(doc, fields))
    }

    fn delete(&self, doc: &DocRef) -> Result<()> {
        self.write_then_notify(doc, |collections| {
            if let Some(coll) = collections.get_mut(&doc.collection) {
                coll.remove(&doc.id);
            }
            Ok(())
        })
    }

    fn subscribe(&self, target: &Target, listener: Listener) -> Result<Unsubscribe> {
        let _emit = self.emit_lock.lock();

        if !self.is_available() {
            debug!(?target, "subscription failed before first delivery");
            listener(Err(StoreError::Subscription("store unavailable".into())));
            return Ok(Unsubscribe::noop());
        }

        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let initial: Delivery = {
            let collections = self.collections.read();
            self.listeners.write().insert(
                id,
                Registration {
                    target: target.clone(),
                    listener: Arc::clone(&listener),
                },
            );
            Ok(Self::snapshot(&collections, target))
        };
        debug!(listener = id, collection = target.collection(), "opened subscription");

        listener(initial);

        let registry: Weak<Registry> = Arc::downgrade(&self.listeners);
        Ok(Unsubscribe::new(move || {
            if let Some(registry) = registry.upgrade() {
                if registry.write().remove(&id).is_some() {
                    debug!(listener = id, "closed subscription");
                }
            }
        }))
    }
}

/// Recursive merge: nested objects are merged, everything else replaced.
fn merge_fields(existing: &mut Fields, incoming: Fields) {
    for (key, value) in incoming {
        match (existing.get_mut(&key), value) {
            (Some(Value::Object(current)), Value::Object(next)) => merge_fields(current, next),
            (_, value) => {
                existing.insert(key, value);
            }
        }
    }
}
