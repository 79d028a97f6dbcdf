//! Memtable - In-memory sorted write buffer
//!
//! The Memtable holds recent writes before they are flushed to disk as
//! SSTables. Every namespace gets its own sorted map keyed by
//! `(user key ascending, sequence descending)`, so all versions of one key
//! sit next to each other with the newest first. Readers pick the newest
//! version at or below their read sequence, which is what lets snapshots
//! and iterators keep a stable view while writers keep going.

use hyperstore_core::{NamespaceId, SequenceNumber, WriteOp};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Per-entry bookkeeping charged to the size estimate (sequence + tag)
const ENTRY_OVERHEAD: usize = 9;

/// Entry value in the memtable - can be a value or a tombstone (deletion marker)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemtableEntry {
    /// A live value
    Value(Vec<u8>),
    /// A tombstone marking deletion
    Tombstone,
}

impl MemtableEntry {
    /// Returns the size of this entry in bytes
    pub fn size(&self) -> usize {
        match self {
            MemtableEntry::Value(v) => v.len() + 1, // +1 for type tag
            MemtableEntry::Tombstone => 1,
        }
    }

    /// The value, or `None` for a tombstone
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            MemtableEntry::Value(v) => Some(v),
            MemtableEntry::Tombstone => None,
        }
    }
}

/// Memtable key: user key ascending, then sequence descending
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionedKey {
    /// User key
    pub key: Vec<u8>,
    /// Commit sequence, reversed so newer versions sort first
    pub sequence: Reverse<SequenceNumber>,
}

impl VersionedKey {
    /// Build a key for `key` at `sequence`
    pub fn new(key: Vec<u8>, sequence: SequenceNumber) -> Self {
        Self {
            key,
            sequence: Reverse(sequence),
        }
    }

    /// Smallest versioned key for `key`; sorts before every version of it
    fn first_of(key: &[u8]) -> Self {
        Self::new(key.to_vec(), SequenceNumber::MAX)
    }

    /// Largest versioned key for `key`; sorts after every version of it
    fn last_of(key: &[u8]) -> Self {
        Self::new(key.to_vec(), 0)
    }
}

/// Memtable - an in-memory sorted write buffer
///
/// Provides O(log n) insert and version lookup. When the memtable reaches a
/// size threshold, the engine freezes it and flushes it to disk.
#[derive(Debug, Default)]
pub struct Memtable {
    /// One sorted map per namespace that has seen a write
    tables: BTreeMap<NamespaceId, BTreeMap<VersionedKey, MemtableEntry>>,
    /// Approximate size in bytes (for flush threshold checking)
    size_bytes: usize,
    /// Total number of versions held
    entries: usize,
    /// Highest sequence applied
    max_sequence: SequenceNumber,
}

impl Memtable {
    /// Creates a new empty Memtable
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a version of `key`
    pub fn insert(
        &mut self,
        namespace: NamespaceId,
        key: Vec<u8>,
        sequence: SequenceNumber,
        entry: MemtableEntry,
    ) {
        let key_len = key.len();
        let added = key_len + entry.size() + ENTRY_OVERHEAD;
        let table = self.tables.entry(namespace).or_default();

        // Two ops of one batch on the same key share a sequence; the later wins.
        match table.insert(VersionedKey::new(key, sequence), entry) {
            Some(old) => {
                let removed = key_len + old.size() + ENTRY_OVERHEAD;
                self.size_bytes = self.size_bytes.saturating_sub(removed) + added;
            }
            None => {
                self.size_bytes += added;
                self.entries += 1;
            }
        }
        self.max_sequence = self.max_sequence.max(sequence);
    }

    /// Applies every op of a committed batch at `sequence`
    pub fn apply(&mut self, sequence: SequenceNumber, ops: &[WriteOp]) {
        for op in ops {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => self.insert(
                    *namespace,
                    key.clone(),
                    sequence,
                    MemtableEntry::Value(value.clone()),
                ),
                WriteOp::Delete { namespace, key } => {
                    self.insert(*namespace, key.clone(), sequence, MemtableEntry::Tombstone)
                }
            }
        }
    }

    /// Newest version of `key` with a sequence at or below `sequence`
    ///
    /// Returns:
    /// - `Some(MemtableEntry::Value(_))` if that version is live
    /// - `Some(MemtableEntry::Tombstone)` if the key was deleted
    /// - `None` if the memtable holds no visible version of the key
    pub fn get(
        &self,
        namespace: NamespaceId,
        key: &[u8],
        sequence: SequenceNumber,
    ) -> Option<(SequenceNumber, &MemtableEntry)> {
        let table = self.tables.get(&namespace)?;
        table
            .range(VersionedKey::new(key.to_vec(), sequence)..)
            .next()
            .filter(|(vk, _)| vk.key == key)
            .map(|(vk, entry)| (vk.sequence.0, entry))
    }

    /// Smallest user key at or after `target` (strictly after if `!inclusive`)
    ///
    /// Considers every version regardless of sequence.
    pub fn next_key(&self, namespace: NamespaceId, target: &[u8], inclusive: bool) -> Option<&[u8]> {
        let table = self.tables.get(&namespace)?;
        let lower = if inclusive {
            Bound::Included(VersionedKey::first_of(target))
        } else {
            Bound::Excluded(VersionedKey::last_of(target))
        };
        table
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(vk, _)| vk.key.as_slice())
    }

    /// Largest user key strictly before `target`, or the largest key overall
    pub fn prev_key(&self, namespace: NamespaceId, target: Option<&[u8]>) -> Option<&[u8]> {
        let table = self.tables.get(&namespace)?;
        let found = match target {
            Some(target) => table.range(..VersionedKey::first_of(target)).next_back(),
            None => table.iter().next_back(),
        };
        found.map(|(vk, _)| vk.key.as_slice())
    }

    /// Every version in one namespace, in `(key asc, sequence desc)` order
    pub fn iter(
        &self,
        namespace: NamespaceId,
    ) -> impl Iterator<Item = (&VersionedKey, &MemtableEntry)> {
        self.tables.get(&namespace).into_iter().flatten()
    }

    /// Namespaces holding at least one version
    pub fn namespaces(&self) -> impl Iterator<Item = NamespaceId> + '_ {
        self.tables
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(ns, _)| *ns)
    }

    /// Returns the approximate size of the memtable in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns the number of versions in the memtable
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Returns true if the memtable is empty
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Highest sequence applied so far (0 if empty)
    pub fn max_sequence(&self) -> SequenceNumber {
        self.max_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: NamespaceId = NamespaceId::NODES;

    fn put(mt: &mut Memtable, key: &[u8], seq: u64, value: &[u8]) {
        mt.insert(NS, key.to_vec(), seq, MemtableEntry::Value(value.to_vec()));
    }

    #[test]
    fn test_memtable_new() {
        let mt = Memtable::new();
        assert!(mt.is_empty());
        assert_eq!(mt.len(), 0);
        assert_eq!(mt.size_bytes(), 0);
        assert_eq!(mt.max_sequence(), 0);
    }

    #[test]
    fn test_memtable_put_get() {
        let mut mt = Memtable::new();
        put(&mut mt, b"key1", 1, b"value1");
        put(&mut mt, b"key2", 2, b"value2");

        assert_eq!(mt.len(), 2);
        let (seq, entry) = mt.get(NS, b"key1", 10).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(entry.as_value(), Some(b"value1".as_slice()));
        assert!(mt.get(NS, b"key3", 10).is_none());
    }

    #[test]
    fn test_memtable_versions_respect_read_sequence() {
        let mut mt = Memtable::new();
        put(&mut mt, b"key", 1, b"v1");
        put(&mut mt, b"key", 5, b"v5");
        mt.insert(NS, b"key".to_vec(), 9, MemtableEntry::Tombstone);

        assert!(mt.get(NS, b"key", 0).is_none());
        assert_eq!(mt.get(NS, b"key", 4).unwrap().1.as_value(), Some(b"v1".as_slice()));
        assert_eq!(mt.get(NS, b"key", 5).unwrap().1.as_value(), Some(b"v5".as_slice()));
        assert_eq!(mt.get(NS, b"key", 100).unwrap().1, &MemtableEntry::Tombstone);
        assert_eq!(mt.len(), 3);
    }

    #[test]
    fn test_memtable_namespaces_are_isolated() {
        let mut mt = Memtable::new();
        put(&mut mt, b"key", 1, b"node");
        mt.insert(
            NamespaceId::LINKS,
            b"key".to_vec(),
            2,
            MemtableEntry::Value(b"link".to_vec()),
        );

        assert_eq!(mt.get(NS, b"key", 10).unwrap().1.as_value(), Some(b"node".as_slice()));
        assert_eq!(
            mt.get(NamespaceId::LINKS, b"key", 10).unwrap().1.as_value(),
            Some(b"link".as_slice())
        );
        assert!(mt.get(NamespaceId::DEFAULT, b"key", 10).is_none());
        assert_eq!(mt.namespaces().collect::<Vec<_>>(), vec![NS, NamespaceId::LINKS]);
    }

    #[test]
    fn test_memtable_same_sequence_overwrites() {
        let mut mt = Memtable::new();
        put(&mut mt, b"key", 3, b"first");
        mt.insert(NS, b"key".to_vec(), 3, MemtableEntry::Tombstone);

        assert_eq!(mt.len(), 1);
        assert_eq!(mt.get(NS, b"key", 3).unwrap().1, &MemtableEntry::Tombstone);
    }

    #[test]
    fn test_memtable_apply_batch() {
        let mut mt = Memtable::new();
        mt.apply(
            7,
            &[
                WriteOp::Put {
                    namespace: NS,
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                WriteOp::Delete {
                    namespace: NS,
                    key: b"b".to_vec(),
                },
            ],
        );

        assert_eq!(mt.max_sequence(), 7);
        assert_eq!(mt.get(NS, b"a", 7).unwrap().0, 7);
        assert_eq!(mt.get(NS, b"b", 7).unwrap().1, &MemtableEntry::Tombstone);
    }

    #[test]
    fn test_memtable_key_navigation() {
        let mut mt = Memtable::new();
        put(&mut mt, b"b", 1, b"");
        put(&mut mt, b"b", 2, b"");
        put(&mut mt, b"d", 3, b"");

        assert_eq!(mt.next_key(NS, b"", true), Some(b"b".as_slice()));
        assert_eq!(mt.next_key(NS, b"b", true), Some(b"b".as_slice()));
        assert_eq!(mt.next_key(NS, b"b", false), Some(b"d".as_slice()));
        assert_eq!(mt.next_key(NS, b"c", true), Some(b"d".as_slice()));
        assert_eq!(mt.next_key(NS, b"d", false), None);

        assert_eq!(mt.prev_key(NS, None), Some(b"d".as_slice()));
        assert_eq!(mt.prev_key(NS, Some(b"d")), Some(b"b".as_slice()));
        assert_eq!(mt.prev_key(NS, Some(b"b")), None);
        assert_eq!(mt.prev_key(NamespaceId::LINKS, None), None);
    }

    #[test]
    fn test_memtable_size_tracking() {
        let mut mt = Memtable::new();
        let initial_size = mt.size_bytes();
        put(&mut mt, b"key", 1, b"value");
        assert!(mt.size_bytes() > initial_size);
    }

    #[test]
    fn test_memtable_iter_sorted() {
        let mut mt = Memtable::new();
        put(&mut mt, b"c", 1, b"3");
        put(&mut mt, b"a", 2, b"1");
        put(&mut mt, b"a", 4, b"1'");
        put(&mut mt, b"b", 3, b"2");

        let versions: Vec<_> = mt
            .iter(NS)
            .map(|(vk, _)| (vk.key.clone(), vk.sequence.0))
            .collect();
        assert_eq!(
            versions,
            vec![
                (b"a".to_vec(), 4),
                (b"a".to_vec(), 2),
                (b"b".to_vec(), 3),
                (b"c".to_vec(), 1),
            ]
        );
    }
}
