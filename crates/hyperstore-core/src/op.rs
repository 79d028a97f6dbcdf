//! Mutation records shared by batches, the write-ahead log and the memtable.

use crate::namespace::NamespaceId;
use serde::{Deserialize, Serialize};

/// Global, monotonically increasing commit sequence number.
pub type SequenceNumber = u64;

/// A single pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or overwrite `key`
    Put {
        /// Target namespace
        namespace: NamespaceId,
        /// Key bytes
        key: Vec<u8>,
        /// Value bytes
        value: Vec<u8>,
    },
    /// Remove `key`
    Delete {
        /// Target namespace
        namespace: NamespaceId,
        /// Key bytes
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// Namespace this mutation targets.
    pub fn namespace(&self) -> NamespaceId {
        match self {
            WriteOp::Put { namespace, .. } | WriteOp::Delete { namespace, .. } => *namespace,
        }
    }

    /// Key this mutation targets.
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }

    /// Approximate in-memory footprint, used for buffer accounting.
    pub fn approximate_size(&self) -> usize {
        match self {
            WriteOp::Put { key, value, .. } => key.len() + value.len() + 16,
            WriteOp::Delete { key, .. } => key.len() + 16,
        }
    }

    /// Same mutation aimed at another namespace.
    pub fn with_namespace(self, namespace: NamespaceId) -> Self {
        match self {
            WriteOp::Put { key, value, .. } => WriteOp::Put {
                namespace,
                key,
                value,
            },
            WriteOp::Delete { key, .. } => WriteOp::Delete { namespace, key },
        }
    }
}
