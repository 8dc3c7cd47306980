//! Participant records
//!
//! A participant is a partition the transaction has contacted. Its read/write
//! status only ever moves forward:
//!
//! ```text
//! Pending ──► ReadOnly ──► Written
//!    └────────────────────────▲
//! ```

use serde::{Deserialize, Serialize};
use shardtxn_core::PartitionId;

/// Whether a participant has written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStatus {
    /// Contacted, but the partition has not said whether it wrote
    Pending,
    /// Only reads so far
    ReadOnly,
    /// At least one write
    Written,
}

impl ReadStatus {
    /// Whether the participant has written
    pub fn is_written(&self) -> bool {
        matches!(self, ReadStatus::Written)
    }
}

/// Access reported for a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The partition only read
    Read,
    /// The partition wrote
    Write,
    /// Not reported yet
    Unknown,
}

impl Access {
    /// Access from a reported `readOnly` flag
    pub fn from_read_only(read_only: Option<bool>) -> Self {
        match read_only {
            Some(true) => Access::Read,
            Some(false) => Access::Write,
            None => Access::Unknown,
        }
    }
}

impl From<bool> for Access {
    /// `true` means the statement writes
    fn from(is_write: bool) -> Self {
        if is_write {
            Access::Write
        } else {
            Access::Read
        }
    }
}

/// How a participant came to be known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantSource {
    /// Targeted directly by a client statement
    TopLevel,
    /// Reported by another partition's sub-operation
    NestedSubOp,
    /// Reported on a `getMore` response
    GetMore,
    /// Discovered after commit began and absorbed into two-phase commit
    LateDuringCommit,
}

/// A partition participating in a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The partition
    pub partition_id: PartitionId,
    /// Read/write status
    pub read_status: ReadStatus,
    /// Elected two-phase commit coordinator (the first writer)
    pub is_coordinator: bool,
    /// Discovery path
    pub added_via: ParticipantSource,
    /// Statement that created this participant
    pub stmt_id_created_at: u32,
}

impl Participant {
    /// Build a participant record
    pub fn new(
        partition_id: PartitionId,
        read_status: ReadStatus,
        added_via: ParticipantSource,
        stmt_id_created_at: u32,
    ) -> Self {
        Self {
            partition_id,
            read_status,
            is_coordinator: false,
            added_via,
            stmt_id_created_at,
        }
    }

    /// Whether the participant has written
    pub fn is_written(&self) -> bool {
        self.read_status.is_written()
    }
}
