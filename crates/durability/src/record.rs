//! Decision log record format.
//!
//! The decision log is a single append-only file of self-delimiting records.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The length field covers format version, payload and CRC. The payload is a
//! MessagePack-encoded [`CommitDecision`]. The CRC covers format version and
//! payload.

use crate::decision::CommitDecision;
use crc32fast::Hasher;
use shardtxn_core::Result;

/// Current decision record format version
pub const DECISION_RECORD_FORMAT_VERSION: u8 = 1;

/// Smallest valid value of the length field: version byte plus CRC
const MIN_RECORD_LEN: usize = 5;

/// Serialize a decision to record bytes.
pub fn encode_record(decision: &CommitDecision) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(decision)?;

    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(DECISION_RECORD_FORMAT_VERSION);
    payload.extend_from_slice(&body);

    let crc = compute_crc(&payload);
    let total_len = payload.len() + 4;

    let mut record = Vec::with_capacity(4 + total_len);
    record.extend_from_slice(&(total_len as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc.to_le_bytes());
    Ok(record)
}

/// Parse one record from the front of `bytes`.
///
/// Returns (decision, bytes_consumed) on success.
pub fn decode_record(bytes: &[u8]) -> std::result::Result<(CommitDecision, usize), RecordError> {
    let length = read_u32(bytes, 0).ok_or(RecordError::InsufficientData)? as usize;

    if length < MIN_RECORD_LEN {
        return Err(RecordError::InvalidFormat);
    }
    if bytes.len() < 4 + length {
        return Err(RecordError::InsufficientData);
    }

    let payload = &bytes[4..4 + length - 4];
    let stored_crc = read_u32(bytes, length).ok_or(RecordError::InsufficientData)?;
    let computed_crc = compute_crc(payload);
    if computed_crc != stored_crc {
        return Err(RecordError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }

    let format_version = payload[0];
    if format_version != DECISION_RECORD_FORMAT_VERSION {
        return Err(RecordError::UnsupportedVersion(format_version));
    }

    let decision = rmp_serde::from_slice(&payload[1..])
        .map_err(|e| RecordError::Payload(e.to_string()))?;
    Ok((decision, 4 + length))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Record format is invalid
    #[error("Invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Checksum matched but the payload did not decode
    #[error("Undecodable payload: {0}")]
    Payload(String),
}
