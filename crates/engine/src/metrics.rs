//! Router transaction metrics
//!
//! Process-wide counters shared by every session's router:
//! - Lifecycle totals (started, committed, aborted) and the open gauge
//! - Participant fan-out (contacted, at commit, requests targeted)
//! - Per commit type: initiated, successful, successful duration
//! - Abort causes keyed by error code name
//!
//! Reported under `transactions` in server status.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shardtxn_concurrency::CommitType;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Abort cause recorded for an explicit client `abortTransaction`
pub const EXPLICIT_ABORT_CAUSE: &str = "abort";

#[derive(Debug, Default)]
struct CommitTypeCounters {
    initiated: AtomicU64,
    successful: AtomicU64,
    successful_duration_micros: AtomicU64,
}

impl CommitTypeCounters {
    fn snapshot(&self) -> CommitTypeStats {
        CommitTypeStats {
            initiated: self.initiated.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            successful_duration_micros: self.successful_duration_micros.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.initiated.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.successful_duration_micros.store(0, Ordering::Relaxed);
    }
}

/// Router metrics
///
/// # Memory Ordering
///
/// All counters use Relaxed ordering: they are observational only and do not
/// synchronize any other memory. A snapshot taken while transactions run may
/// mix values from slightly different instants.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    current_open: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
    total_contacted_participants: AtomicU64,
    total_participants_at_commit: AtomicU64,
    total_requests_targeted: AtomicU64,
    commit_types: [CommitTypeCounters; 6],
    abort_cause: DashMap<String, u64>,
}

impl RouterMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record transaction start
    pub fn record_start(&self) {
        self.current_open.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record newly contacted participants
    pub fn record_contacted_participants(&self, count: usize) {
        self.total_contacted_participants
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record requests sent to partitions on the transaction's behalf
    pub fn record_requests_targeted(&self, count: usize) {
        self.total_requests_targeted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record the start of one commit attempt
    pub fn record_commit_initiated(&self, commit_type: CommitType, participants_at_commit: usize) {
        self.commit_types[commit_type.index()]
            .initiated
            .fetch_add(1, Ordering::Relaxed);
        self.total_participants_at_commit
            .fetch_add(participants_at_commit as u64, Ordering::Relaxed);
    }

    /// Record a successful commit
    ///
    /// Decrements the open gauge (saturating at 0).
    pub fn record_commit(&self, commit_type: CommitType, duration: Duration) {
        let counters = &self.commit_types[commit_type.index()];
        counters.successful.fetch_add(1, Ordering::Relaxed);
        counters
            .successful_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.close_one();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an abort with its cause
    ///
    /// Decrements the open gauge (saturating at 0).
    pub fn record_abort(&self, cause: &str) {
        *self.abort_cause.entry(cause.to_string()).or_insert(0) += 1;
        self.close_one();
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction replaced by a newer one before it ended
    ///
    /// Only the open gauge moves; it is neither committed nor aborted.
    pub fn record_abandoned(&self) {
        self.close_one();
    }

    fn close_one(&self) {
        // Saturating decrement so a stray double-close cannot underflow
        let _ = self
            .current_open
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    /// Current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        let commit_types = CommitType::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), self.commit_types[t.index()].snapshot()))
            .collect();
        let abort_cause = self
            .abort_cause
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        MetricsSnapshot {
            current_open: self.current_open.load(Ordering::Relaxed),
            total_started: self.total_started.load(Ordering::Relaxed),
            total_committed: self.total_committed.load(Ordering::Relaxed),
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            total_contacted_participants: self.total_contacted_participants.load(Ordering::Relaxed),
            total_participants_at_commit: self.total_participants_at_commit.load(Ordering::Relaxed),
            total_requests_targeted: self.total_requests_targeted.load(Ordering::Relaxed),
            commit_types,
            abort_cause,
        }
    }

    /// Zero every counter
    ///
    /// The open gauge is left alone; it tracks live transactions.
    pub fn reset(&self) {
        self.total_started.store(0, Ordering::Relaxed);
        self.total_committed.store(0, Ordering::Relaxed);
        self.total_aborted.store(0, Ordering::Relaxed);
        self.total_contacted_participants.store(0, Ordering::Relaxed);
        self.total_participants_at_commit.store(0, Ordering::Relaxed);
        self.total_requests_targeted.store(0, Ordering::Relaxed);
        for counters in &self.commit_types {
            counters.reset();
        }
        self.abort_cause.clear();
    }

    /// `{"transactions": {...}}` server status section
    pub fn server_status(&self) -> serde_json::Value {
        serde_json::json!({ "transactions": self.snapshot() })
    }
}

/// Per commit type counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitTypeStats {
    /// Commit attempts that chose this type
    pub initiated: u64,
    /// Attempts that succeeded
    pub successful: u64,
    /// Total duration of successful attempts
    pub successful_duration_micros: u64,
}

/// Point-in-time copy of [`RouterMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Transactions started and not yet ended
    pub current_open: u64,
    /// Transactions started
    pub total_started: u64,
    /// Transactions committed
    pub total_committed: u64,
    /// Transactions aborted
    pub total_aborted: u64,
    /// Participants contacted
    pub total_contacted_participants: u64,
    /// Sum of participant counts at commit classification
    pub total_participants_at_commit: u64,
    /// Requests sent to partitions
    pub total_requests_targeted: u64,
    /// Keyed by commit type name
    pub commit_types: BTreeMap<String, CommitTypeStats>,
    /// Abort counts keyed by cause
    pub abort_cause: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Stats for one commit type
    pub fn commit_type(&self, commit_type: CommitType) -> CommitTypeStats {
        self.commit_types
            .get(commit_type.as_str())
            .copied()
            .unwrap_or_default()
    }

    /// Sum of `initiated` over all commit types
    pub fn total_initiated(&self) -> u64 {
        self.commit_types.values().map(|s| s.initiated).sum()
    }
}
