//! # hyperstore Snapshot Registry
//!
//! Point-in-time snapshot bookkeeping for hyperstore databases.
//!
//! ## Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of hyperstore.**
//! Users should depend on the `hyperstore` crate instead, which provides the
//! stable public API.
//!
//! ---
//!
//! A snapshot is nothing more than a commit sequence number that the
//! storage engine promises to keep readable. This crate tracks which
//! sequence numbers are pinned by live snapshots so that compaction knows
//! the oldest version it must preserve.
//!
//! ## Usage
//!
//! ```
//! use hyperstore_snapshot::SnapshotList;
//!
//! let snapshots = SnapshotList::new();
//! let seq = snapshots.acquire(|| 42).unwrap();
//! assert_eq!(snapshots.oldest_or(|| 100).unwrap(), 42);
//! snapshots.release(seq).unwrap();
//! assert_eq!(snapshots.oldest_or(|| 100).unwrap(), 100);
//! ```

#![warn(missing_docs)]

pub mod registry;

pub use registry::{SnapshotInfo, SnapshotList};
