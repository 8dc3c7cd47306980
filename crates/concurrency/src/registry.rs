//! Participant registry
//!
//! One registry per transaction. It is the only place participant state is
//! mutated, so every task that learns about a participant (the statement
//! dispatcher, asynchronous sub-operation results, `getMore` replies) goes
//! through its lock.
//!
//! ## Lifecycle
//!
//! ```text
//! Open ──seal_for_commit──► Sealed ──close──► Closed
//! ```
//!
//! - **Open**: participants may be added, promoted and retracted.
//! - **Sealed**: the commit plan is fixed. Under two-phase commit new
//!   participants are absorbed as late participants; under every other
//!   protocol they are rejected.
//! - **Closed**: the decision is about to be persisted; nothing more is
//!   admitted.

use crate::classifier::CommitPlan;
use crate::participant::{Access, Participant, ParticipantSource, ReadStatus};
use crate::recovery::RecoveryToken;
use parking_lot::Mutex;
use shardtxn_core::{Error, PartitionId, ResponseMetadata, Result, TxnId};
use tracing::{debug, warn};

/// Registry lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    /// Accepting all mutations
    Open,
    /// Commit plan fixed
    Sealed {
        /// Whether late participants are absorbed (two-phase commit)
        absorbing: bool,
    },
    /// No further participants admitted
    Closed,
}

/// Result of adding or updating a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New participant recorded
    Added,
    /// Existing participant's status moved forward
    Updated,
    /// Nothing changed
    Unchanged,
    /// New participant absorbed into a running two-phase commit
    Absorbed,
    /// Change refused because commit already began
    Rejected,
}

/// Where a block of response metadata came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseContext {
    /// Reply to a statement
    Statement,
    /// Reply to a `getMore`; cannot have written
    GetMore,
}

/// Summary of applying one response's metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataReport {
    /// Participants created by this response
    pub created: usize,
    /// Participants absorbed into a running two-phase commit
    pub absorbed: usize,
    /// Changes refused because commit already began
    pub rejected: usize,
}

struct RegistryInner {
    participants: Vec<Participant>,
    phase: RegistryPhase,
    latest_stmt_id: u32,
    plan: Option<CommitPlan>,
    late: Vec<PartitionId>,
}

impl RegistryInner {
    fn position(&self, id: &PartitionId) -> Option<usize> {
        self.participants.iter().position(|p| &p.partition_id == id)
    }

    fn coordinator(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_coordinator)
    }

    /// Flag the first writer as coordinator if none is flagged
    fn elect_coordinator(&mut self) {
        if self.coordinator().is_some() {
            return;
        }
        if let Some(first_writer) = self.participants.iter_mut().find(|p| p.is_written()) {
            first_writer.is_coordinator = true;
        }
    }

    fn upsert(
        &mut self,
        id: &PartitionId,
        access: Access,
        source: ParticipantSource,
        strict: bool,
    ) -> Result<AddOutcome> {
        let Some(index) = self.position(id) else {
            return Ok(self.insert(id, access, source));
        };

        let current = self.participants[index].read_status;
        let next = match (current, access) {
            (_, Access::Unknown) => current,
            (ReadStatus::Written, Access::Read) => {
                if strict {
                    return Err(Error::ReadOnlyRegression {
                        partition: id.clone(),
                    });
                }
                current
            }
            (_, Access::Read) => ReadStatus::ReadOnly,
            (_, Access::Write) => ReadStatus::Written,
        };

        if next == current {
            return Ok(AddOutcome::Unchanged);
        }
        if let RegistryPhase::Sealed { absorbing: false } | RegistryPhase::Closed = self.phase {
            return Ok(AddOutcome::Rejected);
        }

        self.participants[index].read_status = next;
        if next.is_written() {
            self.elect_coordinator();
        }
        Ok(AddOutcome::Updated)
    }

    fn insert(&mut self, id: &PartitionId, access: Access, source: ParticipantSource) -> AddOutcome {
        let status = match access {
            Access::Read => ReadStatus::ReadOnly,
            Access::Write => ReadStatus::Written,
            Access::Unknown => ReadStatus::Pending,
        };

        let (source, outcome) = match self.phase {
            RegistryPhase::Open => (source, AddOutcome::Added),
            RegistryPhase::Sealed { absorbing: true } => {
                self.late.push(id.clone());
                (ParticipantSource::LateDuringCommit, AddOutcome::Absorbed)
            }
            RegistryPhase::Sealed { absorbing: false } | RegistryPhase::Closed => {
                return AddOutcome::Rejected;
            }
        };

        self.participants.push(Participant::new(
            id.clone(),
            status,
            source,
            self.latest_stmt_id,
        ));
        if status.is_written() {
            self.elect_coordinator();
        }
        outcome
    }
}

/// Thread-safe participant set of one transaction
pub struct ParticipantRegistry {
    txn: TxnId,
    inner: Mutex<RegistryInner>,
}

impl ParticipantRegistry {
    /// Create an empty, open registry
    pub fn new(txn: TxnId) -> Self {
        Self {
            txn,
            inner: Mutex::new(RegistryInner {
                participants: Vec::new(),
                phase: RegistryPhase::Open,
                latest_stmt_id: 0,
                plan: None,
                late: Vec::new(),
            }),
        }
    }

    /// Transaction this registry belongs to
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Current phase
    pub fn phase(&self) -> RegistryPhase {
        self.inner.lock().phase
    }

    /// Add a participant, or move its status forward
    ///
    /// Idempotent. `Write` promotes a read-only participant; `Read` on a
    /// written participant is a no-op.
    pub fn add_participant(
        &self,
        id: &PartitionId,
        access: Access,
        source: ParticipantSource,
    ) -> AddOutcome {
        let mut inner = self.inner.lock();
        // Non-strict upsert never fails
        let outcome = inner
            .upsert(id, access, source, false)
            .unwrap_or(AddOutcome::Unchanged);
        self.log_outcome(id, outcome);
        outcome
    }

    /// Merge the transaction metadata of one partition response
    ///
    /// # Errors
    ///
    /// `Error::ReadOnlyRegression` if a partition reports `readOnly: true`
    /// after having written. Updates applied before the offending entry are
    /// kept.
    pub fn apply_response_metadata(
        &self,
        from: &PartitionId,
        metadata: &ResponseMetadata,
        context: ResponseContext,
    ) -> Result<MetadataReport> {
        // A getMore cannot write, so it settles only a still-pending status
        let resolve = |inner: &RegistryInner, id: &PartitionId, read_only: Option<bool>| {
            match (Access::from_read_only(read_only), context) {
                (Access::Unknown, ResponseContext::GetMore) => match inner.position(id) {
                    Some(index) if inner.participants[index].read_status != ReadStatus::Pending => {
                        Access::Unknown
                    }
                    _ => Access::Read,
                },
                (access, _) => access,
            }
        };
        let nested_source = match context {
            ResponseContext::Statement => ParticipantSource::NestedSubOp,
            ResponseContext::GetMore => ParticipantSource::GetMore,
        };

        let mut inner = self.inner.lock();
        let mut report = MetadataReport::default();

        let access = resolve(&*inner, from, metadata.read_only);
        let outcome = inner.upsert(from, access, ParticipantSource::TopLevel, true)?;
        tally(&mut report, outcome);

        for additional in &metadata.additional_participants {
            let source = if additional.partition_id == *from {
                ParticipantSource::TopLevel
            } else {
                nested_source
            };
            let access = resolve(&*inner, &additional.partition_id, additional.read_only);
            let outcome = inner.upsert(&additional.partition_id, access, source, true)?;
            tally(&mut report, outcome);
            self.log_outcome(&additional.partition_id, outcome);
        }

        Ok(report)
    }

    /// Remove a participant
    ///
    /// Returns whether it was present.
    ///
    /// # Errors
    ///
    /// `Error::RegistryClosed` once commit has begun; nothing changes.
    pub fn retract(&self, id: &PartitionId) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.phase != RegistryPhase::Open {
            return Err(Error::RegistryClosed { txn: self.txn });
        }
        let Some(index) = inner.position(id) else {
            return Ok(false);
        };
        let removed = inner.participants.remove(index);
        if removed.is_coordinator {
            inner.elect_coordinator();
        }
        debug!(target: "shardtxn::txn", txn = %self.txn, partition = %id, "Retracted participant");
        Ok(true)
    }

    /// Remove every participant created by the current statement
    ///
    /// Used when the statement must be retargeted (view resolution).
    ///
    /// # Errors
    ///
    /// `Error::RegistryClosed` once commit has begun.
    pub fn retract_pending(&self) -> Result<Vec<PartitionId>> {
        let mut inner = self.inner.lock();
        if inner.phase != RegistryPhase::Open {
            return Err(Error::RegistryClosed { txn: self.txn });
        }
        let stmt_id = inner.latest_stmt_id;
        let mut retracted = Vec::new();
        let mut lost_coordinator = false;
        inner.participants.retain(|p| {
            if p.stmt_id_created_at == stmt_id {
                lost_coordinator |= p.is_coordinator;
                retracted.push(p.partition_id.clone());
                false
            } else {
                true
            }
        });
        if lost_coordinator {
            inner.elect_coordinator();
        }
        if !retracted.is_empty() {
            debug!(
                target: "shardtxn::txn",
                txn = %self.txn,
                stmt_id,
                count = retracted.len(),
                "Retracted participants of current statement"
            );
        }
        Ok(retracted)
    }

    /// Start a new statement; returns its id
    pub fn begin_statement(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.latest_stmt_id += 1;
        inner.latest_stmt_id
    }

    /// Id of the statement in progress
    pub fn current_statement(&self) -> u32 {
        self.inner.lock().latest_stmt_id
    }

    /// Participants in contact order
    pub fn snapshot(&self) -> Vec<Participant> {
        self.inner.lock().participants.clone()
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.inner.lock().participants.len()
    }

    /// Whether no participant has been contacted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is a participant
    pub fn contains(&self, id: &PartitionId) -> bool {
        self.inner.lock().position(id).is_some()
    }

    /// Snapshot and classify in one step
    ///
    /// The first call fixes the plan; later calls return the same plan.
    ///
    /// # Errors
    ///
    /// `Error::UnresolvedParticipant` if a participant never reported its
    /// status. The registry is closed in that case.
    pub fn seal_for_commit(&self) -> Result<CommitPlan> {
        let mut inner = self.inner.lock();
        if let Some(plan) = &inner.plan {
            return Ok(plan.clone());
        }
        if inner.phase != RegistryPhase::Open {
            return Err(Error::RegistryClosed { txn: self.txn });
        }

        match CommitPlan::from_snapshot(inner.participants.clone()) {
            Ok(plan) => {
                inner.phase = RegistryPhase::Sealed {
                    absorbing: plan.protocol.is_two_phase(),
                };
                inner.plan = Some(plan.clone());
                debug!(
                    target: "shardtxn::txn",
                    txn = %self.txn,
                    commit_type = %plan.commit_type(),
                    participants = plan.participants.len(),
                    "Sealed participant set"
                );
                Ok(plan)
            }
            Err(e) => {
                inner.phase = RegistryPhase::Closed;
                Err(e)
            }
        }
    }

    /// The sealed plan, if commit has begun
    pub fn plan(&self) -> Option<CommitPlan> {
        self.inner.lock().plan.clone()
    }

    /// Take participants absorbed since the last drain
    pub fn drain_late(&self) -> Vec<PartitionId> {
        std::mem::take(&mut self.inner.lock().late)
    }

    /// Stop admitting participants; returns any not yet drained
    pub fn close(&self) -> Vec<PartitionId> {
        let mut inner = self.inner.lock();
        inner.phase = RegistryPhase::Closed;
        std::mem::take(&mut inner.late)
    }

    /// Token naming the first writer, if any
    pub fn recovery_token(&self) -> RecoveryToken {
        let inner = self.inner.lock();
        RecoveryToken {
            recovery_partition: inner.coordinator().map(|p| p.partition_id.clone()),
        }
    }

    /// Current coordinator (first writer)
    pub fn coordinator(&self) -> Option<PartitionId> {
        self.inner
            .lock()
            .coordinator()
            .map(|p| p.partition_id.clone())
    }

    fn log_outcome(&self, id: &PartitionId, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Absorbed => debug!(
                target: "shardtxn::txn",
                txn = %self.txn,
                partition = %id,
                "Absorbed late participant into two-phase commit"
            ),
            AddOutcome::Rejected => warn!(
                target: "shardtxn::txn",
                txn = %self.txn,
                partition = %id,
                "Rejected participant change after commit began"
            ),
            AddOutcome::Added | AddOutcome::Updated | AddOutcome::Unchanged => {}
        }
    }
}

fn tally(report: &mut MetadataReport, outcome: AddOutcome) {
    match outcome {
        AddOutcome::Added => report.created += 1,
        AddOutcome::Absorbed => report.absorbed += 1,
        AddOutcome::Rejected => report.rejected += 1,
        AddOutcome::Updated | AddOutcome::Unchanged => {}
    }
}

impl std::fmt::Debug for ParticipantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ParticipantRegistry")
            .field("txn", &self.txn)
            .field("phase", &inner.phase)
            .field("participants", &inner.participants)
            .finish()
    }
}
