//! Registry of live snapshot sequence numbers.

use hyperstore_core::{Error, Result, SequenceNumber};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Information about one pinned sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Pinned commit sequence
    pub sequence: SequenceNumber,
    /// Number of live snapshots sharing this sequence
    pub holders: usize,
    /// Unix milliseconds when the first holder was created
    pub created_at: u64,
}

#[derive(Debug)]
struct Pin {
    holders: usize,
    created_at: u64,
}

/// Thread-safe multiset of live snapshot sequences.
///
/// Reading the current sequence and pinning it happen under the same lock
/// as [`SnapshotList::oldest_or`], so a compaction that computes its
/// retention floor can never miss a snapshot that is being created.
#[derive(Debug, Default)]
pub struct SnapshotList {
    pins: Mutex<BTreeMap<SequenceNumber, Pin>>,
}

impl SnapshotList {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the sequence returned by `current` and return it
    pub fn acquire(&self, current: impl FnOnce() -> SequenceNumber) -> Result<SequenceNumber> {
        let mut pins = self.pins.lock().map_err(|_| Error::LockPoisoned)?;
        let sequence = current();
        pins.entry(sequence)
            .or_insert_with(|| Pin {
                holders: 0,
                created_at: now_millis(),
            })
            .holders += 1;
        debug!(sequence, "snapshot acquired");
        Ok(sequence)
    }

    /// Drop one holder of `sequence`
    ///
    /// Returns false if the sequence was not pinned.
    pub fn release(&self, sequence: SequenceNumber) -> Result<bool> {
        let mut pins = self.pins.lock().map_err(|_| Error::LockPoisoned)?;
        let Some(pin) = pins.get_mut(&sequence) else {
            return Ok(false);
        };
        pin.holders -= 1;
        if pin.holders == 0 {
            pins.remove(&sequence);
        }
        debug!(sequence, "snapshot released");
        Ok(true)
    }

    /// Oldest pinned sequence, or `current()` when nothing is pinned
    ///
    /// The result is never above `current()`.
    pub fn oldest_or(&self, current: impl FnOnce() -> SequenceNumber) -> Result<SequenceNumber> {
        let pins = self.pins.lock().map_err(|_| Error::LockPoisoned)?;
        let current = current();
        Ok(pins
            .keys()
            .next()
            .map_or(current, |oldest| (*oldest).min(current)))
    }

    /// Oldest pinned sequence, if any
    pub fn oldest(&self) -> Result<Option<SequenceNumber>> {
        let pins = self.pins.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(pins.keys().next().copied())
    }

    /// Total number of live snapshots
    pub fn len(&self) -> Result<usize> {
        let pins = self.pins.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(pins.values().map(|p| p.holders).sum())
    }

    /// True when no snapshot is live
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Pinned sequences in ascending order
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let pins = self.pins.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(pins
            .iter()
            .map(|(sequence, pin)| SnapshotInfo {
                sequence: *sequence,
                holders: pin.holders,
                created_at: pin.created_at,
            })
            .collect())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
