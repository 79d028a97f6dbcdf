//! Atomic write batches.

use hyperstore_core::{NamespaceId, WriteOp};

/// Ordered group of mutations committed atomically by
/// [`Database::write`](crate::Database::write)
///
/// A batch is a plain buffer: it does not reference a database and is not
/// synchronized. Operations apply in insertion order, so a later operation on
/// the same key wins. Dropping the batch discards it.
///
/// # Examples
///
/// ```rust,no_run
/// use hyperstore::{Database, NamespaceId, WriteBatch};
///
/// let db = Database::open("./graph", true, Default::default())?;
/// let mut batch = WriteBatch::new();
/// batch.put_in(NamespaceId::NODES, b"node:1", b"concept");
/// batch.put_in(NamespaceId::OUTGOING, b"node:1", b"link:7");
/// db.write(&batch)?;
/// # Ok::<(), hyperstore::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put into the default namespace
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_in(NamespaceId::DEFAULT, key, value);
    }

    /// Queue a delete from the default namespace
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_in(NamespaceId::DEFAULT, key);
    }

    /// Queue a put into `namespace`
    pub fn put_in(&mut self, namespace: NamespaceId, key: &[u8], value: &[u8]) {
        self.ops.push(WriteOp::Put {
            namespace,
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    /// Queue a delete from `namespace`
    pub fn delete_in(&mut self, namespace: NamespaceId, key: &[u8]) {
        self.ops.push(WriteOp::Delete {
            namespace,
            key: key.to_vec(),
        });
    }

    /// Number of queued operations
    pub fn count(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discard every queued operation, keeping the allocation
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Queued operations in commit order
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Rough encoded size of the queued operations
    pub fn approximate_size(&self) -> usize {
        self.ops.iter().map(WriteOp::approximate_size).sum()
    }
}
