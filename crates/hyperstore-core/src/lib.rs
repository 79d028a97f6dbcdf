//! # hyperstore core
//!
//! Core types shared by every hyperstore crate: the error type, namespace
//! registry, compression and option sets, and the mutation record written
//! to the log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format_version;
pub mod namespace;
pub mod op;
pub mod options;

pub use error::{Error, Result};
pub use namespace::{NamespaceId, NamespaceRegistry, MAX_NAMESPACES, WELL_KNOWN_NAMESPACES};
pub use op::{SequenceNumber, WriteOp};
pub use options::{Compression, ReadOptions, WriteOptions};
