//! Compression selection and per-operation option sets.

use serde::{Deserialize, Serialize};

/// Block compression applied to SSTable data.
///
/// `Fast` is Snappy, `Balanced` LZ4 and `HighRatio` zstd.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    /// Store blocks as-is
    #[default]
    None,
    /// Snappy: cheapest compression, favours write throughput
    Fast,
    /// LZ4: middle ground between speed and size
    Balanced,
    /// zstd level 19: smallest output, slowest to write
    HighRatio,
}

impl Compression {
    /// Whether blocks are stored as-is
    pub fn is_none(self) -> bool {
        self == Compression::None
    }

    /// Stable on-disk tag.
    pub fn as_u8(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Fast => 1,
            Compression::Balanced => 2,
            Compression::HighRatio => 3,
        }
    }

    /// Decode an on-disk tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::None),
            1 => Some(Compression::Fast),
            2 => Some(Compression::Balanced),
            3 => Some(Compression::HighRatio),
            _ => None,
        }
    }
}

/// Options applied to a single write or batch commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// fsync the log before the write returns, whatever the database's durability mode
    pub sync: bool,
}

impl WriteOptions {
    /// Options that force an fsync for this write.
    pub fn synced() -> Self {
        Self { sync: true }
    }
}

/// Options applied to a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Verify block checksums when reading from disk
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_default_is_none() {
        assert_eq!(Compression::default(), Compression::None);
        assert!(Compression::None.is_none());
        assert!(!Compression::Fast.is_none());
    }

    #[test]
    fn test_compression_tags() {
        for c in [
            Compression::None,
            Compression::Fast,
            Compression::Balanced,
            Compression::HighRatio,
        ] {
            assert_eq!(Compression::from_u8(c.as_u8()), Some(c));
        }
        assert_eq!(Compression::from_u8(9), None);
    }

    #[test]
    fn test_option_defaults() {
        assert!(!WriteOptions::default().sync);
        assert!(WriteOptions::synced().sync);
        assert!(ReadOptions::default().verify_checksums);
    }
}
