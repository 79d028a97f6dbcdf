//! Block compression for SSTable data blocks
//!
//! Each setting maps to one codec: `Fast` is Snappy, `Balanced` is LZ4 with
//! the decompressed length prepended, `HighRatio` is zstd level 19. Tables
//! record their setting in the footer, so readers pick the codec per table.

use hyperstore_core::{Compression, Error, Result};
use std::io::Write;

/// zstd level behind [`Compression::HighRatio`]
const HIGH_RATIO_LEVEL: i32 = 19;

/// Compress `data` according to `compression`
pub fn compress(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Fast => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::Storage(format!("Failed to compress: {}", e))),
        Compression::Balanced => Ok(lz4_flex::compress_prepend_size(data)),
        Compression::HighRatio => {
            let mut encoder =
                zstd::Encoder::new(Vec::with_capacity(data.len() / 2), HIGH_RATIO_LEVEL)
                    .map_err(|e| Error::Storage(format!("Failed to create zstd encoder: {}", e)))?;
            encoder
                .write_all(data)
                .map_err(|e| Error::Storage(format!("Failed to compress: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| Error::Storage(format!("Failed to finish compression: {}", e)))
        }
    }
}

/// Reverse [`compress`]
pub fn decompress(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    let corrupt = |e: &dyn std::fmt::Display| {
        Error::Corruption(format!("Failed to decompress {:?} block: {}", compression, e))
    };
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Fast => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| corrupt(&e)),
        Compression::Balanced => lz4_flex::decompress_size_prepended(data).map_err(|e| corrupt(&e)),
        Compression::HighRatio => zstd::decode_all(data).map_err(|e| corrupt(&e)),
    }
}
