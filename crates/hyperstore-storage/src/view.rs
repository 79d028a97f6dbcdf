//! Point-in-time set of data sources a read runs against.
//!
//! A [`ReadView`] is immutable once published. Flushes and compactions
//! build a new view and swap it in, while readers holding the old one
//! keep using the memtables and open table handles it references.
//!
//! Sources are ordered newest first: the active memtable, frozen memtables,
//! level-0 tables by descending sequence, then level 1. Every source only
//! holds sequences older than the sources before it, so the first source
//! with a visible version of a key has the answer.

use crate::memtable::{Memtable, MemtableEntry};
use crate::sstable::{SSTableMeta, SSTableReader};
use hyperstore_core::{Error, NamespaceId, Result, SequenceNumber};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Where a positioned read should land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek<'a> {
    /// Smallest key
    First,
    /// Largest key
    Last,
    /// Smallest key at or after the target
    AtOrAfter(&'a [u8]),
    /// Smallest key strictly after the target
    After(&'a [u8]),
    /// Largest key strictly before the target
    Before(&'a [u8]),
}

/// A memtable that no longer accepts writes and waits to be flushed
#[derive(Debug)]
pub struct FrozenMemtable {
    /// The buffered versions
    pub memtable: Arc<RwLock<Memtable>>,
    /// Every sequence in the memtable is at or below this
    pub last_sequence: SequenceNumber,
    /// WAL segments below this id only describe this or older memtables
    pub wal_boundary: u64,
}

/// An open table plus its manifest description
#[derive(Debug)]
pub struct Table {
    /// Persisted description
    pub meta: SSTableMeta,
    /// Open reader
    pub reader: Arc<SSTableReader>,
}

impl Table {
    /// File name inside the table directory
    pub fn file_name(&self) -> String {
        self.meta
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Tables of one namespace
#[derive(Debug, Clone, Default)]
pub struct NamespaceTables {
    /// Level-0 tables, newest first; key ranges may overlap
    pub level0: Vec<Arc<Table>>,
    /// Level-1 tables sorted by key; key ranges are disjoint
    pub level1: Vec<Arc<Table>>,
}

impl NamespaceTables {
    /// Add a freshly flushed table
    pub fn push_level0(&mut self, table: Arc<Table>) {
        self.level0.push(table);
        self.level0
            .sort_by(|a, b| b.meta.max_sequence.cmp(&a.meta.max_sequence));
    }

    /// Add a level-1 table, keeping key order
    pub fn push_level1(&mut self, table: Arc<Table>) {
        self.level1.push(table);
        self.level1.sort_by(|a, b| a.meta.min_key.cmp(&b.meta.min_key));
    }

    /// Drop the tables named in `removed`
    pub fn remove(&mut self, removed: &[String]) {
        self.level0.retain(|t| !removed.contains(&t.file_name()));
        self.level1.retain(|t| !removed.contains(&t.file_name()));
    }

    /// All tables, newest first
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.level0.iter().chain(self.level1.iter())
    }

    /// Level-1 table whose range covers `key`
    fn level1_for(&self, key: &[u8]) -> Option<&Arc<Table>> {
        let idx = self
            .level1
            .partition_point(|t| t.meta.max_key.as_slice() < key);
        self.level1
            .get(idx)
            .filter(|t| t.meta.min_key.as_slice() <= key)
    }
}

/// Immutable set of sources for reads
#[derive(Debug, Clone)]
pub struct ReadView {
    /// Memtable receiving writes
    pub active: Arc<RwLock<Memtable>>,
    /// Frozen memtables, newest first
    pub frozen: Vec<Arc<FrozenMemtable>>,
    /// On-disk tables per namespace
    pub tables: BTreeMap<NamespaceId, NamespaceTables>,
}

impl ReadView {
    /// A view with an empty memtable and the given tables
    pub fn new(tables: BTreeMap<NamespaceId, NamespaceTables>) -> Self {
        Self {
            active: Arc::new(RwLock::new(Memtable::new())),
            frozen: Vec::new(),
            tables,
        }
    }

    /// Memtables, newest first
    fn memtables(&self) -> impl Iterator<Item = &Arc<RwLock<Memtable>>> {
        std::iter::once(&self.active).chain(self.frozen.iter().map(|f| &f.memtable))
    }

    /// Tables of `namespace`, if any
    pub fn namespace_tables(&self, namespace: NamespaceId) -> Option<&NamespaceTables> {
        self.tables.get(&namespace)
    }

    /// Newest live value of `key` visible at `sequence`
    pub fn get(
        &self,
        namespace: NamespaceId,
        key: &[u8],
        sequence: SequenceNumber,
        verify_checksums: bool,
    ) -> Result<Option<Vec<u8>>> {
        for memtable in self.memtables() {
            let memtable = memtable.read().map_err(|_| Error::LockPoisoned)?;
            if let Some((_, entry)) = memtable.get(namespace, key, sequence) {
                return Ok(match entry {
                    MemtableEntry::Value(v) => Some(v.clone()),
                    MemtableEntry::Tombstone => None,
                });
            }
        }

        let Some(tables) = self.tables.get(&namespace) else {
            return Ok(None);
        };
        let candidates = tables.level0.iter().chain(tables.level1_for(key));
        for table in candidates {
            if let Some(entry) = table.reader.get(key, sequence, verify_checksums)? {
                return Ok((!entry.is_tombstone()).then_some(entry.value));
            }
        }

        Ok(None)
    }

    /// Next user key in the direction of `seek`, live or not
    fn neighbour_key(
        &self,
        namespace: NamespaceId,
        seek: Seek<'_>,
        verify_checksums: bool,
    ) -> Result<Option<Vec<u8>>> {
        let forward = matches!(seek, Seek::First | Seek::AtOrAfter(_) | Seek::After(_));
        let mut best: Option<Vec<u8>> = None;
        let mut offer = |candidate: Option<Vec<u8>>| {
            if let Some(candidate) = candidate {
                let better = match &best {
                    None => true,
                    Some(current) if forward => candidate < *current,
                    Some(current) => candidate > *current,
                };
                if better {
                    best = Some(candidate);
                }
            }
        };

        for memtable in self.memtables() {
            let memtable = memtable.read().map_err(|_| Error::LockPoisoned)?;
            let found = match seek {
                Seek::First => memtable.next_key(namespace, &[], true),
                Seek::AtOrAfter(target) => memtable.next_key(namespace, target, true),
                Seek::After(target) => memtable.next_key(namespace, target, false),
                Seek::Before(target) => memtable.prev_key(namespace, Some(target)),
                Seek::Last => memtable.prev_key(namespace, None),
            };
            offer(found.map(<[u8]>::to_vec));
        }

        if let Some(tables) = self.tables.get(&namespace) {
            for table in tables.iter() {
                let reader = &table.reader;
                let found = match seek {
                    Seek::First => reader.next_key(&[], true, verify_checksums)?,
                    Seek::AtOrAfter(target) => reader.next_key(target, true, verify_checksums)?,
                    Seek::After(target) => reader.next_key(target, false, verify_checksums)?,
                    Seek::Before(target) => reader.prev_key(Some(target), verify_checksums)?,
                    Seek::Last => reader.prev_key(None, verify_checksums)?,
                };
                offer(found);
            }
        }

        Ok(best)
    }

    /// First live entry in the direction of `seek` visible at `sequence`
    ///
    /// Keys whose visible version is a tombstone, or that have no version
    /// at or below `sequence`, are skipped.
    pub fn seek(
        &self,
        namespace: NamespaceId,
        seek: Seek<'_>,
        sequence: SequenceNumber,
        verify_checksums: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let forward = matches!(seek, Seek::First | Seek::AtOrAfter(_) | Seek::After(_));
        let mut candidate = self.neighbour_key(namespace, seek, verify_checksums)?;

        while let Some(key) = candidate {
            if let Some(value) = self.get(namespace, &key, sequence, verify_checksums)? {
                return Ok(Some((key, value)));
            }
            let next = if forward {
                Seek::After(&key)
            } else {
                Seek::Before(&key)
            };
            candidate = self.neighbour_key(namespace, next, verify_checksums)?;
        }

        Ok(None)
    }

    /// Approximate number of versions across memtables and tables
    pub fn estimated_entries(&self) -> Result<u64> {
        let mut total = 0u64;
        for memtable in self.memtables() {
            total += memtable.read().map_err(|_| Error::LockPoisoned)?.len() as u64;
        }
        total += self
            .tables
            .values()
            .flat_map(NamespaceTables::iter)
            .map(|t| t.meta.entry_count)
            .sum::<u64>();
        Ok(total)
    }

    /// Number of tables at `level` across namespaces
    pub fn files_at_level(&self, level: u32) -> usize {
        self.tables
            .values()
            .map(|t| match level {
                0 => t.level0.len(),
                1 => t.level1.len(),
                _ => 0,
            })
            .sum()
    }

    /// Total bytes of all live tables
    pub fn total_table_bytes(&self) -> u64 {
        self.tables
            .values()
            .flat_map(NamespaceTables::iter)
            .map(|t| t.meta.file_size)
            .sum()
    }
}
