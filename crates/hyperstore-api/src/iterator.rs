//! Ordered cursors over one namespace.

use crate::snapshot::SnapshotState;
use crate::DatabaseInner;
use hyperstore_core::{Error, NamespaceId, ReadOptions, Result};
use hyperstore_storage::Seek;
use std::sync::{Arc, Weak};

#[derive(Debug)]
enum Cursor {
    Unpositioned,
    Valid { key: Vec<u8>, value: Vec<u8> },
    Invalid,
}

/// Cursor over the keys of one namespace in ascending byte order
///
/// Starts unpositioned; a seek makes it valid (on an entry) or invalid (no
/// such entry). Without a snapshot every step reads the latest committed
/// state. With one, every step reads as of the snapshot, and releasing the
/// snapshot invalidates the iterator.
///
/// # Examples
///
/// ```rust,no_run
/// use hyperstore::{Database, NamespaceId};
///
/// let db = Database::open("./graph", true, Default::default())?;
/// let mut iter = db.iter(NamespaceId::NODES)?;
/// iter.seek_to_first()?;
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key()?, iter.value()?);
///     iter.next()?;
/// }
/// # Ok::<(), hyperstore::Error>(())
/// ```
#[derive(Debug)]
pub struct DbIterator {
    db: Weak<DatabaseInner>,
    namespace: NamespaceId,
    snapshot: Option<Arc<SnapshotState>>,
    read: ReadOptions,
    cursor: Cursor,
}

impl DbIterator {
    pub(crate) fn new(
        db: &Arc<DatabaseInner>,
        namespace: NamespaceId,
        snapshot: Option<Arc<SnapshotState>>,
    ) -> Result<Self> {
        if db.engine.is_closed() {
            return Err(Error::NotOpen);
        }
        let namespace = db.engine.resolve_namespace(namespace)?;
        Ok(Self {
            db: Arc::downgrade(db),
            namespace,
            snapshot,
            read: db.options.read,
            cursor: Cursor::Unpositioned,
        })
    }

    /// Namespace the iterator walks
    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    /// Position on the smallest key
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.position(Seek::First)
    }

    /// Position on the largest key
    pub fn seek_to_last(&mut self) -> Result<()> {
        self.position(Seek::Last)
    }

    /// Position on the smallest key at or after `target`
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.position(Seek::AtOrAfter(target))
    }

    /// Step to the next key
    pub fn next(&mut self) -> Result<()> {
        let key = self.current_key()?.to_vec();
        self.position(Seek::After(&key))
    }

    /// Step to the previous key
    pub fn prev(&mut self) -> Result<()> {
        let key = self.current_key()?.to_vec();
        self.position(Seek::Before(&key))
    }

    /// Whether the iterator sits on an entry
    ///
    /// False once the bound snapshot is released or the database closes.
    pub fn valid(&self) -> bool {
        matches!(self.cursor, Cursor::Valid { .. }) && self.check_usable().is_ok()
    }

    /// Key of the current entry
    pub fn key(&self) -> Result<&[u8]> {
        self.current_key()
    }

    /// Value of the current entry
    pub fn value(&self) -> Result<&[u8]> {
        self.check_usable()?;
        match &self.cursor {
            Cursor::Valid { value, .. } => Ok(value.as_slice()),
            _ => Err(not_positioned()),
        }
    }

    fn current_key(&self) -> Result<&[u8]> {
        self.check_usable()?;
        match &self.cursor {
            Cursor::Valid { key, .. } => Ok(key.as_slice()),
            _ => Err(not_positioned()),
        }
    }

    fn snapshot_released(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.is_released())
    }

    /// The database must be open and the snapshot, if any, unreleased
    fn check_usable(&self) -> Result<()> {
        match self.db.upgrade() {
            Some(db) if !db.engine.is_closed() => {}
            _ => return Err(Error::NotOpen),
        }
        if self.snapshot_released() {
            return Err(Error::InvalidState(
                "iterator's snapshot has been released".into(),
            ));
        }
        Ok(())
    }

    fn position(&mut self, seek: Seek<'_>) -> Result<()> {
        let found = self.check_usable().and_then(|_| {
            let db = self.db.upgrade().ok_or(Error::NotOpen)?;
            let sequence = self.snapshot.as_ref().map(|s| s.sequence);
            db.engine.seek(self.namespace, seek, &self.read, sequence)
        });

        match found {
            Ok(Some((key, value))) => {
                self.cursor = Cursor::Valid { key, value };
                Ok(())
            }
            Ok(None) => {
                self.cursor = Cursor::Invalid;
                Ok(())
            }
            Err(e) => {
                self.cursor = Cursor::Invalid;
                Err(e)
            }
        }
    }
}

fn not_positioned() -> Error {
    Error::InvalidState("iterator is not positioned on an entry".into())
}
