//! Identity types for distributed transactions
//!
//! This module defines:
//! - SessionId: logical session a client drives transactions on
//! - TxnId: `(session, txn_number)`, the identity of one transaction
//! - PartitionId: name of a backend partition
//! - LogicalTime: cluster timestamp used for prepare and commit

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical session identifier (`lsid`)
///
/// A SessionId wraps a UUID v4. Transactions on one session are strictly
/// ordered by their txn number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a SessionId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse a SessionId from its string form
    ///
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this SessionId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one transaction: `(session, txn_number)`
///
/// Ordering is by session first, then txn number, so a BTreeMap keyed by
/// TxnId groups a session's transactions together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId {
    /// Owning session
    pub session: SessionId,
    /// Monotonic number within the session
    pub txn_number: u64,
}

impl TxnId {
    /// Create a new transaction identity
    pub fn new(session: SessionId, txn_number: u64) -> Self {
        Self {
            session,
            txn_number,
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.txn_number)
    }
}

/// Name of a backend partition (shard)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    /// Create a partition id from any string-like value
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the partition name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PartitionId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Cluster-wide logical timestamp
///
/// Prepare timestamps are chosen by participants; the commit timestamp of a
/// two-phase commit is the maximum of all prepare timestamps.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogicalTime(pub u64);

impl LogicalTime {
    /// The zero timestamp
    pub const ZERO: LogicalTime = LogicalTime(0);

    /// Raw counter value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}
