//! Commit coordinator
//!
//! Executes the commit protocol chosen at classification. There is one
//! handler per [`CommitProtocol`] variant and a single exhaustive dispatch.
//!
//! Ordering guarantees:
//! - `SingleWriteShard`: every read-only participant has answered its commit
//!   before the write participant is asked to commit.
//! - `TwoPhase`: the decision is durable in the [`DecisionLog`] before any
//!   participant receives `commitTransaction` or `abortTransaction`.

use crate::config::CoordinatorConfig;
use crate::transport::PartitionClient;
use crate::write_concern::{FailureContext, WriteConcernEvaluator};
use futures::future::join_all;
use shardtxn_concurrency::{CommitPlan, CommitProtocol, CommitType, ParticipantRegistry, RecoveryToken};
use shardtxn_core::{
    CommandError, CommandResponse, Error, ErrorCode, LogicalTime, PartitionId, TxnId,
    WriteConcern, WriteConcernError,
};
use shardtxn_durability::{CommitDecision, DecisionLog, Outcome, PersistOutcome, Vote};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Pause between commit propagation attempts, multiplied by the attempt number
const PROPAGATION_BACKOFF: Duration = Duration::from_millis(10);

/// Commit progress of one transaction, as seen by its router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No commit requested yet
    NotStarted,
    /// Taking the participant snapshot
    ClassifyingCommit,
    /// Running the protocol for this commit type
    Committing(CommitType),
    /// Commit acknowledged
    Committed,
    /// Transaction aborted
    Aborted,
}

/// Runs commit protocols against partitions
#[derive(Clone)]
pub struct CommitCoordinator {
    client: Arc<dyn PartitionClient>,
    decisions: Arc<dyn DecisionLog>,
    evaluator: WriteConcernEvaluator,
    config: Arc<CoordinatorConfig>,
}

impl CommitCoordinator {
    /// Create a coordinator
    pub fn new(
        client: Arc<dyn PartitionClient>,
        decisions: Arc<dyn DecisionLog>,
        config: Arc<CoordinatorConfig>,
    ) -> Self {
        Self {
            client,
            decisions,
            evaluator: WriteConcernEvaluator::new(config.write_concern.clone()),
            config,
        }
    }

    /// Write concern evaluator in use
    pub fn evaluator(&self) -> &WriteConcernEvaluator {
        &self.evaluator
    }

    /// Partition transport
    pub fn client(&self) -> &Arc<dyn PartitionClient> {
        &self.client
    }

    /// Decision log
    pub fn decisions(&self) -> &Arc<dyn DecisionLog> {
        &self.decisions
    }

    /// Configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run the commit protocol of `plan`
    ///
    /// `registry` must be the sealed registry `plan` came from; two-phase
    /// commit drains late participants from it and closes it.
    pub async fn commit(
        &self,
        txn: TxnId,
        plan: &CommitPlan,
        registry: &ParticipantRegistry,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        debug!(
            target: "shardtxn::commit",
            txn = %txn,
            commit_type = %plan.commit_type(),
            participants = plan.participants.len(),
            "Committing"
        );

        match &plan.protocol {
            CommitProtocol::NoShards => self.evaluator.coordinator_success(write_concern),
            CommitProtocol::SingleShard { participant } => {
                self.commit_single_shard(txn, participant, write_concern)
                    .await
            }
            CommitProtocol::ReadOnly { participants } => {
                self.commit_read_only(txn, participants, write_concern)
                    .await
            }
            CommitProtocol::SingleWriteShard { write, read_only } => {
                self.commit_single_write_shard(txn, write, read_only, write_concern)
                    .await
            }
            CommitProtocol::TwoPhase {
                coordinator,
                participants,
            } => {
                self.commit_two_phase(txn, coordinator, participants, registry, write_concern)
                    .await
            }
        }
    }

    async fn commit_single_shard(
        &self,
        txn: TxnId,
        participant: &PartitionId,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        let response = self
            .client
            .commit(participant, txn, write_concern, None)
            .await;
        self.evaluator.label_commit_response(response)
    }

    async fn commit_read_only(
        &self,
        txn: TxnId,
        participants: &[PartitionId],
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        let replies = self.commit_all(txn, participants, write_concern).await;
        self.evaluator.read_only_outcome(write_concern, replies)
    }

    async fn commit_single_write_shard(
        &self,
        txn: TxnId,
        write: &PartitionId,
        read_only: &[PartitionId],
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        let replies = self.commit_all(txn, read_only, write_concern).await;

        if let Some((failed, error)) = self.evaluator.read_phase_failure(replies) {
            warn!(
                target: "shardtxn::commit",
                txn = %txn,
                partition = %failed,
                code = %error.code,
                "Read-only phase failed; aborting single-write-shard transaction"
            );
            let mut everyone = read_only.to_vec();
            everyone.push(write.clone());
            self.abort_all(txn, &everyone).await;
            return CommandResponse::failed(error);
        }

        let response = self.client.commit(write, txn, write_concern, None).await;
        self.evaluator.label_commit_response(response)
    }

    async fn commit_two_phase(
        &self,
        txn: TxnId,
        coordinator: &PartitionId,
        participants: &[PartitionId],
        registry: &ParticipantRegistry,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        let deadline = Instant::now() + self.config.prepare_timeout();
        let internal_wc = WriteConcern::majority();
        let mut everyone = participants.to_vec();
        let mut batch = participants.to_vec();
        let mut votes = BTreeMap::new();
        let mut closed = false;

        loop {
            let prepares = batch.iter().map(|partition| {
                let internal_wc = &internal_wc;
                async move {
                    let vote = match timeout_at(
                        deadline,
                        self.client.prepare(partition, txn, internal_wc),
                    )
                    .await
                    {
                        Ok(Ok(prepare_ts)) => Vote::Commit(prepare_ts),
                        Ok(Err(e)) => Vote::Abort(e.code.as_str().to_string()),
                        Err(_elapsed) => Vote::NoResponse,
                    };
                    (partition.clone(), vote)
                }
            });
            let mut refused = false;
            for (partition, vote) in join_all(prepares).await {
                refused |= vote.prepare_timestamp().is_none();
                votes.insert(partition, vote);
            }
            if refused {
                break;
            }

            let mut late = registry.drain_late();
            if late.is_empty() {
                late = registry.close();
                closed = true;
            }
            if late.is_empty() {
                break;
            }
            debug!(
                target: "shardtxn::commit",
                txn = %txn,
                late = late.len(),
                "Preparing late participants"
            );
            everyone.extend(late.iter().cloned());
            batch = late;
        }

        if !closed {
            // Whatever arrives now is aborted with everyone else
            everyone.extend(registry.close());
        }

        let decision = CommitDecision::from_votes(txn, votes);
        let decision = match self.persist(&decision) {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(
                    target: "shardtxn::commit",
                    txn = %txn,
                    error = %e,
                    "Failed to persist commit decision; aborting"
                );
                self.abort_all(txn, &everyone).await;
                return CommandResponse::failed(self.evaluator.label(
                    CommandError::no_such_transaction(format!(
                        "Transaction aborted: commit decision could not be persisted: {}",
                        e
                    )),
                    FailureContext::AbortedEverywhere,
                ));
            }
        };

        info!(
            target: "shardtxn::commit",
            txn = %txn,
            coordinator = %coordinator,
            participants = everyone.len(),
            decision = %decision.outcome,
            "Two-phase commit decided"
        );

        match (decision.outcome, decision.commit_timestamp) {
            (Outcome::Committed, Some(commit_ts)) => {
                self.deliver_commit(txn, everyone, commit_ts, write_concern)
                    .await
            }
            _ => {
                self.abort_all(txn, &everyone).await;
                CommandResponse::failed(self.aborted_error(&decision))
            }
        }
    }

    /// Persist a decision, deferring to one already persisted
    fn persist(&self, decision: &CommitDecision) -> Result<CommitDecision, Error> {
        match self.decisions.persist(decision) {
            Ok(PersistOutcome::Written) | Ok(PersistOutcome::AlreadyPersisted) => {
                Ok(decision.clone())
            }
            Err(Error::DecisionConflict { txn }) => {
                let existing = self
                    .decisions
                    .get(&txn)
                    .ok_or(Error::DecisionConflict { txn })?;
                warn!(
                    target: "shardtxn::commit",
                    txn = %txn,
                    decision = %existing.outcome,
                    "Commit decision already persisted; following it"
                );
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }

    fn aborted_error(&self, decision: &CommitDecision) -> CommandError {
        let cause = decision
            .votes
            .iter()
            .find_map(|(partition, vote)| match vote {
                Vote::Abort(code) => Some(format!("{} voted to abort with {}", partition, code)),
                Vote::NoResponse => Some(format!("{} did not prepare in time", partition)),
                Vote::Commit(_) => None,
            })
            .unwrap_or_else(|| "coordinator decided to abort".to_string());
        self.evaluator.label(
            CommandError::no_such_transaction(format!("Transaction was aborted: {}", cause)),
            FailureContext::AbortedEverywhere,
        )
    }

    /// Send the commit decision, in the background if configured
    async fn deliver_commit(
        &self,
        txn: TxnId,
        participants: Vec<PartitionId>,
        commit_ts: LogicalTime,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        if self.config.return_after_decision {
            let this = self.clone();
            tokio::spawn(async move {
                this.propagate_commit(txn, &participants, commit_ts).await;
            });
            return self.evaluator.coordinator_success(write_concern);
        }

        let replies = self.propagate_commit(txn, &participants, commit_ts).await;
        let unacknowledged = replies.iter().find(|(_, reply)| !reply.is_ok());
        if let Some((partition, _)) = unacknowledged {
            return CommandResponse::ok_with_write_concern_error(WriteConcernError::new(
                ErrorCode::WriteConcernFailed,
                format!(
                    "Transaction committed but {} has not acknowledged the decision",
                    partition
                ),
            ));
        }
        self.evaluator.coordinator_success(write_concern)
    }

    /// `commitTransaction{commit_ts}` to every participant, retrying
    /// retryable failures
    async fn propagate_commit(
        &self,
        txn: TxnId,
        participants: &[PartitionId],
        commit_ts: LogicalTime,
    ) -> Vec<(PartitionId, CommandResponse)> {
        let internal_wc = WriteConcern::majority();
        let attempts = self.config.commit_retry_attempts.max(1);
        let commits = participants.iter().map(|partition| {
            let internal_wc = &internal_wc;
            async move {
                let mut attempt = 1;
                loop {
                    let reply = self
                        .client
                        .commit(partition, txn, internal_wc, Some(commit_ts))
                        .await;
                    let retryable = reply
                        .error
                        .as_ref()
                        .is_some_and(|e| e.code.is_retryable_write_error());
                    if !retryable || attempt >= attempts {
                        if !reply.is_ok() {
                            error!(
                                target: "shardtxn::commit",
                                txn = %txn,
                                partition = %partition,
                                attempt,
                                code = ?reply.code(),
                                "Participant did not acknowledge commit decision"
                            );
                        }
                        return (partition.clone(), reply);
                    }
                    tokio::time::sleep(PROPAGATION_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        });
        join_all(commits).await
    }

    /// Commit `participants` in parallel; replies in contact order
    async fn commit_all(
        &self,
        txn: TxnId,
        participants: &[PartitionId],
        write_concern: &WriteConcern,
    ) -> Vec<(PartitionId, CommandResponse)> {
        let commits = participants.iter().map(|partition| async move {
            let reply = self.client.commit(partition, txn, write_concern, None).await;
            (partition.clone(), reply)
        });
        join_all(commits).await
    }

    /// Best-effort `abortTransaction` to every participant
    pub async fn abort_all(&self, txn: TxnId, participants: &[PartitionId]) {
        let abort_wc = WriteConcern::local();
        let aborts = participants.iter().map(|partition| {
            let abort_wc = &abort_wc;
            async move {
                let reply = self.client.abort(partition, txn, abort_wc).await;
                if let Some(e) = reply.error {
                    debug!(
                        target: "shardtxn::commit",
                        txn = %txn,
                        partition = %partition,
                        code = %e.code,
                        "Abort not acknowledged"
                    );
                }
            }
        });
        join_all(aborts).await;
    }

    /// Explicit client abort on every participant
    ///
    /// The first failure in contact order is returned with commit/abort
    /// labels.
    pub async fn abort(
        &self,
        txn: TxnId,
        participants: &[PartitionId],
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        let aborts = participants.iter().map(|partition| async move {
            self.client.abort(partition, txn, write_concern).await
        });
        let replies = join_all(aborts).await;
        let mut annotation = None;
        for reply in replies {
            if reply.error.is_some() {
                return self.evaluator.label_commit_response(reply);
            }
            if annotation.is_none() {
                annotation = reply.write_concern_error;
            }
        }
        match annotation {
            Some(wce) => CommandResponse::ok_with_write_concern_error(wce),
            None => CommandResponse::ok(),
        }
    }

    /// Finish a commit from a recovery token
    ///
    /// An empty token means the transaction never wrote, so there is nothing
    /// to recover and the client may simply retry it.
    pub async fn recover(
        &self,
        txn: TxnId,
        token: &RecoveryToken,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        let Some(partition) = &token.recovery_partition else {
            return CommandResponse::failed(self.evaluator.label(
                CommandError::no_such_transaction(
                    "Recovery token is empty, meaning the transaction only performed reads \
                     and can be safely retried",
                ),
                FailureContext::CommitOrAbort,
            ));
        };

        if let Some(response) = self.replay_decision(txn, write_concern).await {
            return response;
        }

        debug!(
            target: "shardtxn::commit",
            txn = %txn,
            partition = %partition,
            "Asking recovery partition for commit outcome"
        );
        let response = self
            .client
            .recover_decision(partition, txn, write_concern)
            .await;
        self.evaluator.label_commit_response(response)
    }

    /// Resume a two-phase commit on a retried `commitTransaction`
    ///
    /// A persisted decision is replayed; otherwise the protocol runs again
    /// over the registry's participants (prepare is idempotent).
    pub async fn resume_two_phase(
        &self,
        txn: TxnId,
        plan: &CommitPlan,
        registry: &ParticipantRegistry,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        if let Some(response) = self.replay_decision(txn, write_concern).await {
            return response;
        }
        let CommitProtocol::TwoPhase { coordinator, .. } = &plan.protocol else {
            return self.commit(txn, plan, registry, write_concern).await;
        };
        let participants: Vec<PartitionId> = registry
            .snapshot()
            .into_iter()
            .map(|p| p.partition_id)
            .collect();
        self.commit_two_phase(txn, coordinator, &participants, registry, write_concern)
            .await
    }

    /// Re-send a persisted decision; `None` if nothing is persisted
    async fn replay_decision(
        &self,
        txn: TxnId,
        write_concern: &WriteConcern,
    ) -> Option<CommandResponse> {
        let decision = self.decisions.get(&txn)?;
        let participants: Vec<PartitionId> = decision.votes.keys().cloned().collect();
        debug!(
            target: "shardtxn::commit",
            txn = %txn,
            decision = %decision.outcome,
            "Replaying persisted commit decision"
        );
        let response = match (decision.outcome, decision.commit_timestamp) {
            (Outcome::Committed, Some(commit_ts)) => {
                self.deliver_commit(txn, participants, commit_ts, write_concern)
                    .await
            }
            _ => {
                self.abort_all(txn, &participants).await;
                CommandResponse::failed(self.aborted_error(&decision))
            }
        };
        Some(response)
    }
}

impl std::fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("config", &self.config)
            .field("decisions", &self.decisions.len())
            .finish()
    }
}
