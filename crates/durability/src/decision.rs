//! Two-phase commit decisions
//!
//! A [`CommitDecision`] is the coordinator's durable answer for one
//! transaction. Once persisted it never changes: every later commit,
//! abort or recovery request for the transaction replays it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardtxn_core::{LogicalTime, PartitionId, TxnId};
use std::collections::BTreeMap;
use std::fmt;

/// Final outcome of a two-phase commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Every participant prepared; commit at `commit_timestamp`
    Committed,
    /// At least one participant refused, failed or timed out
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => f.write_str("commit"),
            Outcome::Aborted => f.write_str("abort"),
        }
    }
}

/// A participant's answer to `prepareTransaction`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    /// Prepared at this timestamp
    Commit(LogicalTime),
    /// Refused, with the reported error code name
    Abort(String),
    /// No answer before the prepare deadline
    NoResponse,
}

impl Vote {
    /// Prepare timestamp, for a commit vote
    pub fn prepare_timestamp(&self) -> Option<LogicalTime> {
        match self {
            Vote::Commit(ts) => Some(*ts),
            Vote::Abort(_) | Vote::NoResponse => None,
        }
    }
}

/// Persisted coordinator decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDecision {
    /// Transaction decided
    pub txn: TxnId,
    /// Commit or abort
    pub outcome: Outcome,
    /// Commit timestamp; `None` for aborts
    pub commit_timestamp: Option<LogicalTime>,
    /// Votes collected during prepare
    pub votes: BTreeMap<PartitionId, Vote>,
    /// Wall-clock time the decision was made
    pub decided_at: DateTime<Utc>,
}

impl CommitDecision {
    /// Decide from a complete set of votes
    ///
    /// Commits only if every vote is [`Vote::Commit`] (and there is at least
    /// one vote); the commit timestamp is the maximum prepare timestamp.
    pub fn from_votes(txn: TxnId, votes: BTreeMap<PartitionId, Vote>) -> Self {
        let commit_timestamp = votes
            .values()
            .map(Vote::prepare_timestamp)
            .try_fold(LogicalTime::ZERO, |max, ts| ts.map(|ts| max.max(ts)));

        match commit_timestamp {
            Some(ts) if !votes.is_empty() => Self {
                txn,
                outcome: Outcome::Committed,
                commit_timestamp: Some(ts),
                votes,
                decided_at: Utc::now(),
            },
            _ => Self::aborted(txn, votes),
        }
    }

    /// An abort decision
    pub fn aborted(txn: TxnId, votes: BTreeMap<PartitionId, Vote>) -> Self {
        Self {
            txn,
            outcome: Outcome::Aborted,
            commit_timestamp: None,
            votes,
            decided_at: Utc::now(),
        }
    }

    /// Whether this decision commits
    pub fn is_commit(&self) -> bool {
        self.outcome == Outcome::Committed
    }

    /// Whether two decisions agree on what happens to the transaction
    ///
    /// Vote details and decision time are bookkeeping; only outcome and
    /// timestamp must match for a repeated persist to be a no-op.
    pub fn agrees_with(&self, other: &CommitDecision) -> bool {
        self.txn == other.txn
            && self.outcome == other.outcome
            && self.commit_timestamp == other.commit_timestamp
    }
}
