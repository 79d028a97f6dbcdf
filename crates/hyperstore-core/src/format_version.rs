//! On-disk format identification.
//!
//! Every file hyperstore writes carries a magic number and a format version,
//! so a store left behind by another build is either read correctly or
//! rejected with [`Error::Corruption`](crate::Error::Corruption).

/// Magic numbers for file validation
pub mod magic {
    /// SSTable footer: "HSST"
    pub const SSTABLE: u32 = 0x4853_5354;

    /// WAL segment header: "HWAL"
    pub const WAL: u32 = 0x4857_414C;

    /// Manifest header: "HMAN"
    pub const MANIFEST: u32 = 0x484D_414E;
}

/// Version written by this build and the oldest version it still reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    /// Version stamped on new files
    pub current: u16,
    /// Oldest version still accepted on read
    pub oldest_readable: u16,
}

impl FormatVersion {
    const fn new(current: u16, oldest_readable: u16) -> Self {
        Self {
            current,
            oldest_readable,
        }
    }

    /// Whether a file stamped with `version` can be read
    pub fn can_read(&self, version: u16) -> bool {
        (self.oldest_readable..=self.current).contains(&version)
    }
}

/// SSTable footer version
pub const SSTABLE: FormatVersion = FormatVersion::new(1, 1);
/// WAL segment header version
pub const WAL: FormatVersion = FormatVersion::new(1, 1);
/// Manifest header version
pub const MANIFEST: FormatVersion = FormatVersion::new(1, 1);
