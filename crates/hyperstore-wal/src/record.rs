//! WAL record framing.
//!
//! ```text
//! +-----------+---------+------------------+-----------+
//! | len (u32) | kind u8 | bincode payload  | crc32     |
//! +-----------+---------+------------------+-----------+
//!               \______ len bytes _______/
//! ```
//!
//! The CRC covers the kind byte and the payload. A whole batch is one frame,
//! so replay sees either all of a batch or none of it.

use crc32fast::Hasher;
use hyperstore_core::{Error, Result, SequenceNumber, WriteOp};
use serde::{Deserialize, Serialize};

/// Smallest possible frame: length + kind + crc
pub const MIN_FRAME_SIZE: usize = 9;

const KIND_BATCH: u8 = 1;
const KIND_CHECKPOINT: u8 = 2;

/// WAL record payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// Every mutation of one commit
    Batch {
        sequence: SequenceNumber,
        ops: Vec<WriteOp>,
    },
    /// Sequences up to and including this one are persisted in SSTables
    Checkpoint { sequence: SequenceNumber },
}

impl RecordPayload {
    fn kind(&self) -> u8 {
        match self {
            RecordPayload::Batch { .. } => KIND_BATCH,
            RecordPayload::Checkpoint { .. } => KIND_CHECKPOINT,
        }
    }
}

/// A WAL record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub payload: RecordPayload,
}

impl WalRecord {
    /// Record committing `ops` at `sequence`
    pub fn batch(sequence: SequenceNumber, ops: Vec<WriteOp>) -> Self {
        Self {
            payload: RecordPayload::Batch { sequence, ops },
        }
    }

    /// Record marking everything up to `sequence` as flushed
    pub fn checkpoint(sequence: SequenceNumber) -> Self {
        Self {
            payload: RecordPayload::Checkpoint { sequence },
        }
    }

    /// Sequence number carried by this record
    pub fn sequence(&self) -> SequenceNumber {
        match &self.payload {
            RecordPayload::Batch { sequence, .. } | RecordPayload::Checkpoint { sequence } => {
                *sequence
            }
        }
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self.payload, RecordPayload::Checkpoint { .. })
    }

    /// Serialize into one self-checking frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&self.payload)
            .map_err(|e| Error::Serialization(format!("encode WAL payload: {}", e)))?;
        let len = u32::try_from(body.len() + 1)
            .map_err(|_| Error::Storage(format!("WAL record of {} bytes", body.len())))?;
        let kind = self.payload.kind();

        let mut frame = Vec::with_capacity(body.len() + MIN_FRAME_SIZE);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.push(kind);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&checksum(kind, &body).to_le_bytes());
        Ok(frame)
    }

    /// Parse the frame at the start of `data`
    ///
    /// Returns the record and the frame's length. A frame cut short is a
    /// `Serialization` error; a bad checksum or kind is `Corruption`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let Some(len_bytes) = data.get(..4) else {
            return Err(Error::Serialization("truncated WAL frame".to_string()));
        };
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        if len == 0 {
            return Err(Error::Corruption("empty WAL frame".to_string()));
        }

        let frame_len = len
            .checked_add(8)
            .ok_or_else(|| Error::Corruption("WAL frame length overflow".to_string()))?;
        let Some(frame) = data.get(..frame_len) else {
            return Err(Error::Serialization(format!(
                "truncated WAL frame: {} of {} bytes",
                data.len(),
                frame_len
            )));
        };

        let kind = frame[4];
        let body = &frame[5..4 + len];
        let stored = &frame[4 + len..];
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let computed = checksum(kind, body);
        if stored != computed {
            return Err(Error::Corruption(format!(
                "WAL checksum {:#010x} does not match contents {:#010x}",
                stored, computed
            )));
        }

        let payload: RecordPayload = bincode::deserialize(body)
            .map_err(|e| Error::Serialization(format!("decode WAL payload: {}", e)))?;
        if payload.kind() != kind {
            return Err(Error::Corruption(format!(
                "WAL frame kind {} does not match its payload",
                kind
            )));
        }

        Ok((WalRecord { payload }, frame_len))
    }
}

fn checksum(kind: u8, body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[kind]);
    hasher.update(body);
    hasher.finalize()
}
