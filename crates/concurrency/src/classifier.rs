//! Commit protocol selection
//!
//! Picks the cheapest correct commit protocol from the participant set:
//!
//! | Participants | Written | Protocol |
//! |--------------|---------|----------|
//! | 0 | - | `NoShards` |
//! | 1 | any | `SingleShard` |
//! | ≥2 | 0 | `ReadOnly` |
//! | ≥2 | 1 | `SingleWriteShard` |
//! | ≥2 | ≥2 | `TwoPhase` |
//!
//! Classification runs once per commit attempt on one snapshot; participants
//! discovered afterwards never change the result.

use crate::participant::{Participant, ReadStatus};
use serde::{Deserialize, Serialize};
use shardtxn_core::{Error, PartitionId, Result};
use std::fmt;

/// Commit path tag, as reported in server status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitType {
    /// No participants
    NoShards,
    /// Exactly one participant
    SingleShard,
    /// Several participants, exactly one written
    SingleWriteShard,
    /// Several participants, none written
    ReadOnly,
    /// Several written participants
    TwoPhaseCommit,
    /// Commit resumed from a recovery token
    RecoverWithToken,
}

impl CommitType {
    /// Every commit type, in reporting order
    pub const ALL: [CommitType; 6] = [
        CommitType::NoShards,
        CommitType::SingleShard,
        CommitType::SingleWriteShard,
        CommitType::ReadOnly,
        CommitType::TwoPhaseCommit,
        CommitType::RecoverWithToken,
    ];

    /// Name reported in server status
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitType::NoShards => "noShards",
            CommitType::SingleShard => "singleShard",
            CommitType::SingleWriteShard => "singleWriteShard",
            CommitType::ReadOnly => "readOnly",
            CommitType::TwoPhaseCommit => "twoPhaseCommit",
            CommitType::RecoverWithToken => "recoverWithToken",
        }
    }

    /// Position in [`CommitType::ALL`]
    pub fn index(&self) -> usize {
        match self {
            CommitType::NoShards => 0,
            CommitType::SingleShard => 1,
            CommitType::SingleWriteShard => 2,
            CommitType::ReadOnly => 3,
            CommitType::TwoPhaseCommit => 4,
            CommitType::RecoverWithToken => 5,
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit protocol chosen for a participant set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitProtocol {
    /// Nothing to contact
    NoShards,
    /// Forward the commit to the only participant
    SingleShard {
        /// The participant
        participant: PartitionId,
    },
    /// Commit every participant in parallel
    ReadOnly {
        /// All participants, in contact order
        participants: Vec<PartitionId>,
    },
    /// Commit readers first, then the single writer
    SingleWriteShard {
        /// The written participant
        write: PartitionId,
        /// Read-only participants, in contact order
        read_only: Vec<PartitionId>,
    },
    /// Prepare everyone, persist a decision, then commit everyone
    TwoPhase {
        /// Participant that owns the decision
        coordinator: PartitionId,
        /// All participants, in contact order (coordinator included)
        participants: Vec<PartitionId>,
    },
}

impl CommitProtocol {
    /// Commit type tag for metrics
    pub fn commit_type(&self) -> CommitType {
        match self {
            CommitProtocol::NoShards => CommitType::NoShards,
            CommitProtocol::SingleShard { .. } => CommitType::SingleShard,
            CommitProtocol::ReadOnly { .. } => CommitType::ReadOnly,
            CommitProtocol::SingleWriteShard { .. } => CommitType::SingleWriteShard,
            CommitProtocol::TwoPhase { .. } => CommitType::TwoPhaseCommit,
        }
    }

    /// Whether late participants may still be absorbed
    pub fn is_two_phase(&self) -> bool {
        matches!(self, CommitProtocol::TwoPhase { .. })
    }
}

/// Select the commit protocol for a participant set
///
/// A participant whose status is still `Pending` counts as not written;
/// [`CommitPlan::from_snapshot`] refuses such sets before they get here.
pub fn classify(participants: &[Participant]) -> CommitProtocol {
    let ids = || participants.iter().map(|p| p.partition_id.clone());
    let written: Vec<&Participant> = participants.iter().filter(|p| p.is_written()).collect();

    match (participants.len(), written.len()) {
        (0, _) => CommitProtocol::NoShards,
        (1, _) => CommitProtocol::SingleShard {
            participant: participants[0].partition_id.clone(),
        },
        (_, 0) => CommitProtocol::ReadOnly {
            participants: ids().collect(),
        },
        (_, 1) => {
            let write = written[0].partition_id.clone();
            CommitProtocol::SingleWriteShard {
                read_only: ids().filter(|id| *id != write).collect(),
                write,
            }
        }
        _ => {
            let coordinator = written
                .iter()
                .find(|p| p.is_coordinator)
                .unwrap_or(&written[0])
                .partition_id
                .clone();
            CommitProtocol::TwoPhase {
                coordinator,
                participants: ids().collect(),
            }
        }
    }
}

/// Classification result for one commit attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPlan {
    /// Chosen protocol
    pub protocol: CommitProtocol,
    /// The snapshot the protocol was chosen from
    pub participants: Vec<Participant>,
}

impl CommitPlan {
    /// Classify a snapshot
    ///
    /// # Errors
    ///
    /// `Error::UnresolvedParticipant` if any participant never reported its
    /// read/write status.
    pub fn from_snapshot(participants: Vec<Participant>) -> Result<Self> {
        if let Some(pending) = participants
            .iter()
            .find(|p| p.read_status == ReadStatus::Pending)
        {
            return Err(Error::UnresolvedParticipant {
                partition: pending.partition_id.clone(),
            });
        }
        Ok(Self {
            protocol: classify(&participants),
            participants,
        })
    }

    /// Commit type tag
    pub fn commit_type(&self) -> CommitType {
        self.protocol.commit_type()
    }

    /// Partition ids in contact order
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.participants
            .iter()
            .map(|p| p.partition_id.clone())
            .collect()
    }
}
