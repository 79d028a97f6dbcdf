//! Error types for hyperstore.

use std::fmt;

/// The main error type for hyperstore operations.
///
/// Absence of a key is never reported through this type; lookups return
/// `Option` instead.
#[derive(Debug)]
pub enum Error {
    /// A lock was poisoned (internal error)
    LockPoisoned,

    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),

    /// On-disk data failed validation (bad magic, checksum, framing)
    Corruption(String),

    /// Storage engine error
    Storage(String),

    /// Invalid path or option combination supplied at open time
    Config(String),

    /// The database path is held by another open handle
    Locked(String),

    /// The database handle is closed or was never opened
    NotOpen,

    /// Operation not allowed in the current state (e.g. reading an invalid iterator)
    InvalidState(String),
}

impl Error {
    /// Returns true if this error reports a closed database.
    pub fn is_not_open(&self) -> bool {
        matches!(self, Error::NotOpen)
    }

    /// Returns true for configuration-time failures.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Locked(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LockPoisoned => write!(f, "Lock poisoned"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Locked(path) => write!(f, "Database is locked by another handle: {}", path),
            Error::NotOpen => write!(f, "Database not open"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for hyperstore operations.
pub type Result<T> = std::result::Result<T, Error>;
