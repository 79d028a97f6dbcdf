//! Point-in-time read views.

use crate::iterator::DbIterator;
use crate::DatabaseInner;
use hyperstore_core::{Error, NamespaceId, Result, SequenceNumber};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Shared between a snapshot and the iterators bound to it
#[derive(Debug)]
pub(crate) struct SnapshotState {
    pub(crate) sequence: SequenceNumber,
    released: AtomicBool,
}

impl SnapshotState {
    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Consistent read-only view of a database as of its creation
///
/// Reads through a snapshot never observe writes committed after it was
/// taken, and compaction keeps every version it can see. Releasing the
/// snapshot (or dropping it) invalidates iterators created from it.
///
/// A snapshot does not keep its database alive; once the database is closed
/// its reads fail with [`Error::NotOpen`].
pub struct Snapshot {
    db: Weak<DatabaseInner>,
    state: Arc<SnapshotState>,
}

impl Snapshot {
    pub(crate) fn new(db: Weak<DatabaseInner>, sequence: SequenceNumber) -> Self {
        Self {
            db,
            state: Arc::new(SnapshotState {
                sequence,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Sequence number the snapshot reads at
    pub fn sequence(&self) -> SequenceNumber {
        self.state.sequence
    }

    /// Value of `key` in `namespace` as of the snapshot
    pub fn get(&self, namespace: NamespaceId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db.upgrade().ok_or(Error::NotOpen)?;
        db.engine
            .get(namespace, key, &db.options.read, Some(self.state.sequence))
    }

    /// Iterator over `namespace` as of the snapshot
    pub fn iter(&self, namespace: NamespaceId) -> Result<DbIterator> {
        let db = self.db.upgrade().ok_or(Error::NotOpen)?;
        DbIterator::new(&db, namespace, Some(Arc::clone(&self.state)))
    }

    /// Release the snapshot
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.state.sequence)
            .finish()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if self.state.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(db) = self.db.upgrade() {
            if let Err(e) = db.engine.release_snapshot(self.state.sequence) {
                warn!(sequence = self.state.sequence, error = %e, "failed to release snapshot");
            }
        }
    }
}
