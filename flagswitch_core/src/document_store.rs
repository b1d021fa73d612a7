//! A thread-safe in-memory storage for the currently active rule document. [`DocumentStore`]
//! provides concurrent access for readers (flag evaluation) and writers (reload and the poller).
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// An immutable snapshot of a loaded document.
#[derive(Debug)]
pub struct DocumentSnapshot<D> {
    /// Timestamp when the document was fetched.
    pub fetched_at: DateTime<Utc>,
    pub document: D,
    /// Raw bytes the document was parsed from. Used to detect changes between fetches.
    pub wire_json: Vec<u8>,
}

impl<D> DocumentSnapshot<D> {
    pub fn new(document: D, wire_json: Vec<u8>) -> DocumentSnapshot<D> {
        DocumentSnapshot {
            fetched_at: Utc::now(),
            document,
            wire_json,
        }
    }

    /// Whether both snapshots were parsed from identical bytes.
    pub fn same_content(&self, other: &DocumentSnapshot<D>) -> bool {
        self.wire_json == other.wire_json
    }
}

/// `DocumentStore` provides a thread-safe (`Sync`) storage for a document snapshot that allows
/// concurrent access for readers and writers.
///
/// Snapshots are immutable and can only be replaced completely.
pub struct DocumentStore<D> {
    snapshot: RwLock<Option<Arc<DocumentSnapshot<D>>>>,
}

impl<D> Default for DocumentStore<D> {
    fn default() -> Self {
        DocumentStore {
            snapshot: RwLock::new(None),
        }
    }
}

impl<D> DocumentStore<D> {
    /// Create a new empty store.
    pub fn new() -> Self {
        DocumentStore::default()
    }

    /// Get the currently active snapshot. Returns `None` if no document has been loaded yet.
    pub fn get(&self) -> Option<Arc<DocumentSnapshot<D>>> {
        // The lock is only poisoned if a writer panicked while holding it, which should never
        // happen.
        let snapshot = self
            .snapshot
            .read()
            .expect("thread holding document lock should not panic");

        snapshot.clone()
    }

    /// Replace the active snapshot, returning the previous one.
    pub fn set(&self, snapshot: Arc<DocumentSnapshot<D>>) -> Option<Arc<DocumentSnapshot<D>>> {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding document lock should not panic");

        slot.replace(snapshot)
    }

    /// Drop the active snapshot.
    pub fn clear(&self) {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding document lock should not panic");

        *slot = None;
    }
}
