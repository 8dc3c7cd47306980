//! Transaction metadata attached to partition responses
//!
//! Every statement or `getMore` reply from a partition participating in a
//! transaction reports whether that partition has only read so far, plus any
//! other partitions its sub-operations contacted on the transaction's behalf
//! (for example the foreign side of a cross-partition join).

use crate::types::PartitionId;
use serde::{Deserialize, Serialize};

/// A partition contacted by another partition's sub-operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalParticipant {
    /// The contacted partition
    pub partition_id: PartitionId,
    /// Read-only status, if the sub-operation has resolved there.
    ///
    /// `None` while the sub-operation is still in flight; the value arrives on
    /// a later `getMore`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl AdditionalParticipant {
    /// Additional participant with a known status
    pub fn resolved(partition_id: impl Into<PartitionId>, read_only: bool) -> Self {
        Self {
            partition_id: partition_id.into(),
            read_only: Some(read_only),
        }
    }

    /// Additional participant whose status is not known yet
    pub fn unresolved(partition_id: impl Into<PartitionId>) -> Self {
        Self {
            partition_id: partition_id.into(),
            read_only: None,
        }
    }
}

/// Transaction metadata returned by a partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Whether the responding partition has only served reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    /// Partitions contacted by this partition's sub-operations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_participants: Vec<AdditionalParticipant>,
}

impl ResponseMetadata {
    /// Metadata for a partition that only read
    pub fn read() -> Self {
        Self {
            read_only: Some(true),
            additional_participants: Vec::new(),
        }
    }

    /// Metadata for a partition that wrote
    pub fn wrote() -> Self {
        Self {
            read_only: Some(false),
            additional_participants: Vec::new(),
        }
    }

    /// Attach an additional participant
    pub fn with_additional(mut self, participant: AdditionalParticipant) -> Self {
        self.additional_participants.push(participant);
        self
    }
}
