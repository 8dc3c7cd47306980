//! Recovery tokens
//!
//! A recovery token names the partition that can answer "did this
//! transaction commit?": the first partition that wrote, which is also the
//! two-phase commit coordinator. Clients carry the token so that a commit
//! interrupted on one router can be finished through another.

use serde::{Deserialize, Serialize};
use shardtxn_core::PartitionId;

/// Token for resuming a commit on another router
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryToken {
    /// Partition holding the outcome; `None` if the transaction only read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_partition: Option<PartitionId>,
}

impl RecoveryToken {
    /// Token of a transaction with no writes
    pub fn empty() -> Self {
        Self::default()
    }

    /// Token naming `partition`
    pub fn for_partition(partition: PartitionId) -> Self {
        Self {
            recovery_partition: Some(partition),
        }
    }

    /// Whether the token names no partition
    pub fn is_empty(&self) -> bool {
        self.recovery_partition.is_none()
    }
}
