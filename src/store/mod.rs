//! Remote document store adapter.
//!
//! `DocumentStore` is the typed seam over an external document database with
//! push-based change notification. Everything above it (the subscription
//! bridge, the session API) talks to the store only through this trait.
//!
//! - Reads return plain field maps plus the document reference
//! - Writes are whole-field replacements (`update`) or full/merged sets (`set`)
//! - `subscribe` delivers the current state once, then every later change
//!
//! `MemoryStore` is the in-process implementation used by tests, benches and
//! single-process deployments.

mod memory;

pub use memory::MemoryStore;

use crate::error::{Result, StoreError};
use crate::types::{DocRef, Document, Fields, Query, Snapshot, Target};
use std::fmt;
use std::sync::Arc;

/// One push from a subscription: the new snapshot or a delivery failure.
pub type Delivery = Result<Snapshot>;

/// Callback invoked by the store on each delivery.
///
/// Called from whichever thread performed the write (or the subscribing
/// thread for the initial delivery), never while the store holds its
/// internal data locks.
pub type Listener = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Handle that closes a store subscription.
///
/// Closing is explicit; dropping the handle without calling it leaves the
/// subscription open.
pub struct Unsubscribe {
    close: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            close: Some(Box::new(close)),
        }
    }

    /// Handle for a subscription that was never registered.
    pub fn noop() -> Self {
        Self { close: None }
    }

    /// Close the subscription.
    pub fn call(mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.close.is_some())
            .finish()
    }
}

/// Read/write/subscribe primitives of the external document database.
pub trait DocumentStore: Send + Sync {
    /// Read a document; `None` if it does not exist.
    fn get(&self, doc: &DocRef) -> Result<Option<Document>>;

    /// One-shot read of a collection query, in the query's sort order.
    fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Write a document. With `merge`, existing fields not in `fields` are kept.
    fn set(&self, doc: &DocRef, fields: Fields, merge: bool) -> Result<()>;

    /// Replace the given top-level fields of an existing document.
    ///
    /// Fails with `NotFound` if the document does not exist.
    fn update(&self, doc: &DocRef, fields: Fields) -> Result<()>;

    /// Create a document with a store-assigned id and creation timestamp.
    fn create(&self, collection: &str, fields: Fields) -> Result<Document>;

    /// Delete a document. Deleting a missing document is not an error.
    fn delete(&self, doc: &DocRef) -> Result<()>;

    /// Open a subscription on a document or query.
    ///
    /// The listener receives the current state immediately, then every later
    /// change. A failure before the first delivery is delivered as an `Err`.
    fn subscribe(&self, target: &Target, listener: Listener) -> Result<Unsubscribe>;

    /// Read a document that must exist.
    fn get_required(&self, doc: &DocRef) -> Result<Document> {
        self.get(doc)?
            .ok_or_else(|| StoreError::NotFound(doc.clone()))
    }

    /// One-shot read of any target.
    fn read(&self, target: &Target) -> Result<Snapshot> {
        match target {
            Target::Document(doc) => Ok(Snapshot::Document(self.get(doc)?)),
            Target::Query(query) => Ok(Snapshot::Collection(self.query(query)?)),
        }
    }
}
