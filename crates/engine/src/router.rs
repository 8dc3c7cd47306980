//! Per-session transaction router
//!
//! A [`TransactionRouter`] owns the transaction currently running on one
//! session. It dispatches statements to partitions, feeds every response's
//! participant metadata into the transaction's [`ParticipantRegistry`], and
//! hands the registry to the [`CommitCoordinator`] at commit time.
//!
//! ## Transaction numbers
//!
//! | Incoming number | Action | Result |
//! |-----------------|--------|--------|
//! | lower | any | `TransactionTooOld` |
//! | same | `Start` | `ConflictingOperationInProgress` |
//! | same | `Continue` / `Commit` | continue |
//! | higher | `Start` | new transaction, previous one abandoned |
//! | higher | `Continue` | `NoSuchTransaction` |
//! | higher | `Commit` | recovering commit (token required) |
//!
//! ## Metrics
//!
//! Tracking ends exactly once per transaction: on a definite commit result,
//! on an explicit abort, or on an implicit abort. While a commit's outcome is
//! unknown, implicit aborts neither message participants nor end tracking.

use crate::coordinator::{CommitCoordinator, CoordinatorState};
use crate::metrics::{RouterMetrics, EXPLICIT_ABORT_CAUSE};
use crate::transport::{StatementFailure, StatementReply, StatementRequest};
use crate::write_concern::FailureContext;
use futures::future::join_all;
use shardtxn_concurrency::{
    Access, AddOutcome, CommitPlan, CommitProtocol, CommitType, MetadataReport, Participant,
    ParticipantRegistry, ParticipantSource, RecoveryToken, ResponseContext,
};
use shardtxn_core::{
    CommandError, CommandResponse, ErrorCode, PartitionId, ResponseMetadata, SessionId, TxnId,
    WriteConcern,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the client asked to do with a transaction number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    /// First statement (`startTransaction: true`)
    Start,
    /// Later statement
    Continue,
    /// `commitTransaction`
    Commit,
}

/// Router-side state of the active transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting statements
    InProgress,
    /// Commit requested, outcome not yet definite
    Committing,
    /// Commit acknowledged
    Committed,
    /// Aborted explicitly, implicitly or by the commit protocol
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminationCause {
    Committed,
    Aborted,
}

impl TerminationCause {
    fn as_str(&self) -> &'static str {
        match self {
            TerminationCause::Committed => "committed",
            TerminationCause::Aborted => "aborted",
        }
    }
}

/// Replies of one statement plus the token to recover its transaction
#[derive(Debug, Clone)]
pub struct StatementOutcome {
    /// Replies in target order
    pub replies: Vec<(PartitionId, StatementReply)>,
    /// Current recovery token
    pub recovery_token: RecoveryToken,
}

/// Handle for reporting participants discovered by sub-operations
///
/// Cloneable and `Send`, so tasks running nested operations on behalf of a
/// statement can report what they touched without going through the router.
#[derive(Debug, Clone)]
pub struct ParticipantSink {
    txn: TxnId,
    registry: Arc<ParticipantRegistry>,
    metrics: Arc<RouterMetrics>,
}

impl ParticipantSink {
    /// Transaction this sink feeds
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Merge the metadata of a sub-operation response from `from`
    pub fn report(
        &self,
        from: &PartitionId,
        metadata: &ResponseMetadata,
    ) -> Result<MetadataReport, CommandError> {
        let report = self
            .registry
            .apply_response_metadata(from, metadata, ResponseContext::Statement)?;
        self.metrics
            .record_contacted_participants(report.created + report.absorbed);
        Ok(report)
    }

    /// Register one partition touched by a sub-operation
    pub fn add(&self, partition: &PartitionId, access: Access) -> AddOutcome {
        let outcome = self
            .registry
            .add_participant(partition, access, ParticipantSource::NestedSubOp);
        if matches!(outcome, AddOutcome::Added | AddOutcome::Absorbed) {
            self.metrics.record_contacted_participants(1);
        }
        outcome
    }
}

#[derive(Debug)]
struct ActiveTransaction {
    txn: TxnId,
    registry: Arc<ParticipantRegistry>,
    state: TransactionState,
    coordinator_state: CoordinatorState,
    recovering: bool,
    commit_type: Option<CommitType>,
    cached_response: Option<CommandResponse>,
    started_at: Instant,
    commit_started_at: Option<Instant>,
    ended_at: Option<Instant>,
    tracking_over: bool,
    abort_cause: Option<String>,
}

impl ActiveTransaction {
    fn new(txn: TxnId, recovering: bool) -> Self {
        Self {
            txn,
            registry: Arc::new(ParticipantRegistry::new(txn)),
            state: TransactionState::InProgress,
            coordinator_state: CoordinatorState::NotStarted,
            recovering,
            commit_type: None,
            cached_response: None,
            started_at: Instant::now(),
            commit_started_at: None,
            ended_at: None,
            tracking_over: false,
            abort_cause: None,
        }
    }

    fn duration(&self) -> Duration {
        self.ended_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at)
    }

    /// Frozen once tracking ends, so repeated reads never go backwards
    fn commit_duration(&self) -> Option<Duration> {
        let start = self.commit_started_at?;
        Some(
            self.ended_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(start),
        )
    }

    /// Commit began and its result is not yet known
    fn commit_outcome_unknown(&self) -> bool {
        self.commit_started_at.is_some() && !self.tracking_over
    }

    fn participant_ids(&self) -> Vec<PartitionId> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|p| p.partition_id)
            .collect()
    }
}

/// Routes the transactions of one session
#[derive(Debug)]
pub struct TransactionRouter {
    session: SessionId,
    coordinator: CommitCoordinator,
    metrics: Arc<RouterMetrics>,
    active: Option<ActiveTransaction>,
}

impl TransactionRouter {
    /// Router for `session` with no transaction yet
    pub fn new(session: SessionId, coordinator: CommitCoordinator, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            session,
            coordinator,
            metrics,
            active: None,
        }
    }

    /// Session this router serves
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Active transaction, if any
    pub fn txn(&self) -> Option<TxnId> {
        self.active.as_ref().map(|a| a.txn)
    }

    /// State of the active transaction
    pub fn state(&self) -> Option<TransactionState> {
        self.active.as_ref().map(|a| a.state)
    }

    /// Commit progress of the active transaction
    pub fn coordinator_state(&self) -> CoordinatorState {
        self.active
            .as_ref()
            .map_or(CoordinatorState::NotStarted, |a| a.coordinator_state)
    }

    /// Commit type chosen for the active transaction
    pub fn commit_type(&self) -> Option<CommitType> {
        self.active.as_ref().and_then(|a| a.commit_type)
    }

    /// Time spent committing so far; fixed once the commit result is known
    pub fn commit_duration(&self) -> Option<Duration> {
        self.active.as_ref().and_then(ActiveTransaction::commit_duration)
    }

    /// Participants in contact order
    pub fn participants(&self) -> Vec<Participant> {
        self.active
            .as_ref()
            .map(|a| a.registry.snapshot())
            .unwrap_or_default()
    }

    /// Token naming the partition that can report the commit outcome
    pub fn recovery_token(&self) -> RecoveryToken {
        self.active
            .as_ref()
            .map(|a| a.registry.recovery_token())
            .unwrap_or_default()
    }

    /// First recorded abort cause of the active transaction
    pub fn abort_cause(&self) -> Option<&str> {
        self.active.as_ref().and_then(|a| a.abort_cause.as_deref())
    }

    /// Check `txn_number` against the session and start or continue a
    /// transaction
    pub fn begin_or_continue(
        &mut self,
        txn_number: u64,
        action: TransactionAction,
    ) -> Result<TxnId, CommandError> {
        if let Some(active) = &self.active {
            let current = active.txn.txn_number;
            if txn_number < current {
                return Err(CommandError::new(
                    ErrorCode::TransactionTooOld,
                    format!(
                        "txnNumber {} is less than last txnNumber {} seen in session {}",
                        txn_number, current, self.session
                    ),
                ));
            }
            if txn_number == current {
                return match (action, active.state) {
                    (TransactionAction::Start, _) => Err(CommandError::new(
                        ErrorCode::ConflictingOperationInProgress,
                        format!(
                            "txnNumber {} for session {} has already been started",
                            txn_number, self.session
                        ),
                    )),
                    (TransactionAction::Commit, _)
                    | (TransactionAction::Continue, TransactionState::InProgress) => {
                        Ok(active.txn)
                    }
                    (TransactionAction::Continue, TransactionState::Aborted) => {
                        Err(self.statement_error(CommandError::no_such_transaction(format!(
                            "Transaction {} has been aborted",
                            active.txn
                        ))))
                    }
                    (TransactionAction::Continue, TransactionState::Committed) => {
                        Err(CommandError::new(
                            ErrorCode::TransactionCommitted,
                            format!("Transaction {} has already been committed", active.txn),
                        ))
                    }
                    (TransactionAction::Continue, TransactionState::Committing) => {
                        Err(CommandError::new(
                            ErrorCode::ConflictingOperationInProgress,
                            format!("Transaction {} is committing", active.txn),
                        ))
                    }
                };
            }
        }

        let txn = TxnId::new(self.session, txn_number);
        if action == TransactionAction::Continue {
            return Err(self.statement_error(CommandError::no_such_transaction(format!(
                "cannot continue txnNumber {} for session {}: transaction was not started",
                txn_number, self.session
            ))));
        }

        self.abandon_active();
        let recovering = action == TransactionAction::Commit;
        debug!(
            target: "shardtxn::txn",
            txn = %txn,
            recovering,
            "Started transaction"
        );
        self.active = Some(ActiveTransaction::new(txn, recovering));
        self.metrics.record_start();
        Ok(txn)
    }

    fn abandon_active(&mut self) {
        let Some(previous) = self.active.take() else {
            return;
        };
        if previous.tracking_over {
            return;
        }
        debug!(
            target: "shardtxn::txn",
            txn = %previous.txn,
            state = ?previous.state,
            "Abandoning transaction for a newer txnNumber"
        );
        self.metrics.record_abandoned();
    }

    fn statement_error(&self, error: CommandError) -> CommandError {
        self.coordinator
            .evaluator()
            .label(error, FailureContext::Statement)
    }

    fn commit_error(&self, error: CommandError) -> CommandResponse {
        CommandResponse::failed(
            self.coordinator
                .evaluator()
                .label(error, FailureContext::CommitOrAbort),
        )
    }

    /// Transaction accepting statements
    fn in_progress(&self) -> Result<(TxnId, Arc<ParticipantRegistry>), CommandError> {
        match &self.active {
            Some(active) if active.state == TransactionState::InProgress && !active.recovering => {
                Ok((active.txn, Arc::clone(&active.registry)))
            }
            Some(active) => Err(self.statement_error(CommandError::no_such_transaction(
                format!("Transaction {} is not accepting statements", active.txn),
            ))),
            None => Err(self.statement_error(CommandError::no_such_transaction(
                "No transaction started on this session",
            ))),
        }
    }

    /// Register a partition the caller contacted itself
    pub fn attach_statement(
        &mut self,
        partition: &PartitionId,
        is_write: bool,
    ) -> Result<AddOutcome, CommandError> {
        let (_, registry) = self.in_progress()?;
        let outcome =
            registry.add_participant(partition, Access::from(is_write), ParticipantSource::TopLevel);
        if outcome == AddOutcome::Added {
            self.metrics.record_contacted_participants(1);
        }
        Ok(outcome)
    }

    /// Handle for sub-operations of the active transaction
    pub fn participant_sink(&self) -> Result<ParticipantSink, CommandError> {
        match &self.active {
            Some(active) => Ok(ParticipantSink {
                txn: active.txn,
                registry: Arc::clone(&active.registry),
                metrics: Arc::clone(&self.metrics),
            }),
            None => Err(self.statement_error(CommandError::no_such_transaction(
                "No transaction started on this session",
            ))),
        }
    }

    fn merge_metadata(
        &self,
        registry: &ParticipantRegistry,
        from: &PartitionId,
        metadata: &ResponseMetadata,
        context: ResponseContext,
    ) -> Result<(), CommandError> {
        let report = registry.apply_response_metadata(from, metadata, context)?;
        self.metrics
            .record_contacted_participants(report.created + report.absorbed);
        Ok(())
    }

    /// Send one statement to every target in parallel
    ///
    /// A view-resolution reply retargets the statement: the participants the
    /// statement created are aborted and retracted, then the rewritten
    /// command is sent to the resolved targets. Any other failure aborts the
    /// transaction on every known participant.
    pub async fn run_statement(
        &mut self,
        targets: &[PartitionId],
        command: serde_json::Value,
    ) -> Result<StatementOutcome, CommandError> {
        let (txn, registry) = self.in_progress()?;
        let max_retargets = self.coordinator.config().max_view_retries;
        let mut targets = targets.to_vec();
        let mut command = command;
        let mut retargets = 0;

        loop {
            let stmt_id = registry.begin_statement();
            let mut requests = Vec::with_capacity(targets.len());
            for partition in &targets {
                let start_transaction = !registry.contains(partition);
                let outcome = registry.add_participant(
                    partition,
                    Access::Unknown,
                    ParticipantSource::TopLevel,
                );
                if outcome == AddOutcome::Added {
                    self.metrics.record_contacted_participants(1);
                }
                requests.push((
                    partition.clone(),
                    StatementRequest {
                        command: command.clone(),
                        start_transaction,
                        stmt_id,
                    },
                ));
            }
            self.metrics.record_requests_targeted(requests.len());

            let client = self.coordinator.client();
            let sends = requests.iter().map(|(partition, request)| async move {
                (
                    partition.clone(),
                    client.run_statement(partition, txn, request).await,
                )
            });
            let results = join_all(sends).await;

            let mut replies = Vec::with_capacity(results.len());
            let mut failure = None;
            let mut resolved_view = None;
            for (partition, result) in results {
                match result {
                    Ok(reply) => {
                        if let Err(e) = self.merge_metadata(
                            &registry,
                            &partition,
                            &reply.metadata,
                            ResponseContext::Statement,
                        ) {
                            failure.get_or_insert(e);
                        }
                        replies.push((partition, reply));
                    }
                    Err(StatementFailure {
                        resolved_view: Some(view),
                        ..
                    }) => {
                        resolved_view.get_or_insert(view);
                    }
                    Err(StatementFailure {
                        error, metadata, ..
                    }) => {
                        // Participants named by a failed reply still need the abort
                        if let Err(e) = self.merge_metadata(
                            &registry,
                            &partition,
                            &metadata,
                            ResponseContext::Statement,
                        ) {
                            debug!(target: "shardtxn::txn", txn = %txn, error = %e, "Ignoring metadata of failed reply");
                        }
                        failure.get_or_insert(error);
                    }
                }
            }

            if let Some(error) = failure {
                warn!(
                    target: "shardtxn::txn",
                    txn = %txn,
                    stmt_id,
                    code = %error.code,
                    "Statement failed; aborting transaction"
                );
                return Err(self.implicit_abort(error).await);
            }

            let Some(view) = resolved_view else {
                return Ok(StatementOutcome {
                    replies,
                    recovery_token: registry.recovery_token(),
                });
            };

            if retargets >= max_retargets {
                let error = CommandError::new(
                    ErrorCode::CommandOnShardedViewNotSupportedOnMongod,
                    format!("View resolution still pending after {} retargets", retargets),
                );
                return Err(self.implicit_abort(error).await);
            }
            let retracted = registry.retract_pending()?;
            debug!(
                target: "shardtxn::txn",
                txn = %txn,
                stmt_id,
                retracted = retracted.len(),
                targets = view.targets.len(),
                "Retargeting statement after view resolution"
            );
            self.coordinator.abort_all(txn, &retracted).await;
            targets = view.targets;
            command = view.command;
            retargets += 1;
        }
    }

    /// Fetch the next batch of a cursor opened by an earlier statement
    ///
    /// Participants first reported without a status resolve to read-only
    /// here, since a `getMore` cannot write.
    pub async fn get_more(
        &mut self,
        partition: &PartitionId,
        cursor_id: u64,
    ) -> Result<StatementOutcome, CommandError> {
        let (txn, registry) = self.in_progress()?;
        self.metrics.record_requests_targeted(1);

        match self
            .coordinator
            .client()
            .get_more(partition, txn, cursor_id)
            .await
        {
            Ok(reply) => {
                if let Err(e) =
                    self.merge_metadata(&registry, partition, &reply.metadata, ResponseContext::GetMore)
                {
                    return Err(self.implicit_abort(e).await);
                }
                Ok(StatementOutcome {
                    replies: vec![(partition.clone(), reply)],
                    recovery_token: registry.recovery_token(),
                })
            }
            Err(failure) => {
                if let Err(e) = self.merge_metadata(
                    &registry,
                    partition,
                    &failure.metadata,
                    ResponseContext::GetMore,
                ) {
                    debug!(target: "shardtxn::txn", txn = %txn, error = %e, "Ignoring metadata of failed reply");
                }
                Err(self.implicit_abort(failure.error).await)
            }
        }
    }

    /// Abort the transaction everywhere because `error` ended it
    ///
    /// Returns `error` labelled for a statement. Does nothing beyond the
    /// labelling while a commit's outcome is unknown or after a commit.
    pub async fn implicit_abort(&mut self, error: CommandError) -> CommandError {
        let error = self.statement_error(error);
        let Some(active) = self.active.as_mut() else {
            return error;
        };
        if active.commit_outcome_unknown() {
            debug!(
                target: "shardtxn::txn",
                txn = %active.txn,
                "Commit outcome unknown; skipping implicit abort"
            );
            return error;
        }
        if active.state == TransactionState::Committed {
            return error;
        }

        active.registry.close();
        let participants = active.participant_ids();
        let txn = active.txn;
        active.state = TransactionState::Aborted;
        active.coordinator_state = CoordinatorState::Aborted;
        active
            .abort_cause
            .get_or_insert_with(|| error.code.as_str().to_string());

        self.coordinator.abort_all(txn, &participants).await;
        self.end_tracking(TerminationCause::Aborted);
        error
    }

    /// `commitTransaction`
    ///
    /// A definite result is cached and returned unchanged on retry. A
    /// transaction first seen through `Commit` is recovered from `token`.
    pub async fn commit(
        &mut self,
        write_concern: &WriteConcern,
        token: Option<&RecoveryToken>,
    ) -> CommandResponse {
        let Some(active) = self.active.as_mut() else {
            return self.commit_error(CommandError::no_such_transaction(
                "No transaction started on this session",
            ));
        };
        if let Some(cached) = &active.cached_response {
            debug!(target: "shardtxn::txn", txn = %active.txn, "Returning cached commit result");
            return cached.clone();
        }

        let txn = active.txn;
        let registry = Arc::clone(&active.registry);
        match active.state {
            TransactionState::Aborted => {
                return self.commit_error(CommandError::no_such_transaction(format!(
                    "Transaction {} has been aborted",
                    txn
                )));
            }
            TransactionState::InProgress
            | TransactionState::Committing
            | TransactionState::Committed => {}
        }

        if active.recovering {
            let Some(token) = token else {
                return CommandResponse::failed(CommandError::new(
                    ErrorCode::InvalidOptions,
                    "Cannot recover the transaction decision without a recoveryToken",
                ));
            };
            self.start_commit(CommitType::RecoverWithToken, 0);
            let response = self.coordinator.recover(txn, token, write_concern).await;
            return self.finish_commit(response);
        }

        let response = match registry.plan() {
            None => self.first_commit(txn, &registry, write_concern).await,
            Some(plan) => self.retry_commit(txn, &plan, &registry, write_concern).await,
        };
        self.finish_commit(response)
    }

    async fn first_commit(
        &mut self,
        txn: TxnId,
        registry: &ParticipantRegistry,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        if let Some(active) = self.active.as_mut() {
            active.state = TransactionState::Committing;
            active.coordinator_state = CoordinatorState::ClassifyingCommit;
        }

        let plan = match registry.seal_for_commit() {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    target: "shardtxn::commit",
                    txn = %txn,
                    error = %e,
                    "Cannot classify commit; aborting transaction"
                );
                let participants: Vec<PartitionId> = registry
                    .snapshot()
                    .into_iter()
                    .map(|p| p.partition_id)
                    .collect();
                self.coordinator.abort_all(txn, &participants).await;
                return CommandResponse::failed(
                    self.coordinator
                        .evaluator()
                        .label(CommandError::from(e), FailureContext::AbortedEverywhere),
                );
            }
        };

        self.start_commit(plan.commit_type(), plan.participants.len());
        self.coordinator
            .commit(txn, &plan, registry, write_concern)
            .await
    }

    async fn retry_commit(
        &mut self,
        txn: TxnId,
        plan: &CommitPlan,
        registry: &ParticipantRegistry,
        write_concern: &WriteConcern,
    ) -> CommandResponse {
        self.start_commit(plan.commit_type(), plan.participants.len());
        debug!(
            target: "shardtxn::commit",
            txn = %txn,
            commit_type = %plan.commit_type(),
            "Retrying commit"
        );
        match &plan.protocol {
            // The read-only participants may already have released their
            // transactions, so only the write participant's outcome counts
            CommitProtocol::SingleWriteShard { write, .. } => {
                let token = RecoveryToken::for_partition(write.clone());
                self.coordinator.recover(txn, &token, write_concern).await
            }
            CommitProtocol::TwoPhase { .. } => {
                self.coordinator
                    .resume_two_phase(txn, plan, registry, write_concern)
                    .await
            }
            CommitProtocol::NoShards
            | CommitProtocol::SingleShard { .. }
            | CommitProtocol::ReadOnly { .. } => {
                self.coordinator
                    .commit(txn, plan, registry, write_concern)
                    .await
            }
        }
    }

    /// Count the commit as initiated, once per transaction
    fn start_commit(&mut self, commit_type: CommitType, participants_at_commit: usize) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.state = TransactionState::Committing;
        active.coordinator_state = CoordinatorState::Committing(commit_type);
        if active.commit_started_at.is_some() || active.tracking_over {
            return;
        }
        active.commit_type = Some(commit_type);
        active.commit_started_at = Some(Instant::now());
        self.metrics
            .record_commit_initiated(commit_type, participants_at_commit);
    }

    fn finish_commit(&mut self, response: CommandResponse) -> CommandResponse {
        let Some(active) = self.active.as_mut() else {
            return response;
        };
        if !response.is_definite() {
            debug!(
                target: "shardtxn::commit",
                txn = %active.txn,
                code = ?response.code(),
                "Commit outcome unknown; not caching result"
            );
            return response;
        }

        active.cached_response = Some(response.clone());
        let cause = match &response.error {
            None => {
                active.state = TransactionState::Committed;
                active.coordinator_state = CoordinatorState::Committed;
                TerminationCause::Committed
            }
            Some(error) => {
                active.state = TransactionState::Aborted;
                active.coordinator_state = CoordinatorState::Aborted;
                active
                    .abort_cause
                    .get_or_insert_with(|| error.code.as_str().to_string());
                TerminationCause::Aborted
            }
        };
        self.end_tracking(cause);
        response
    }

    /// `abortTransaction`
    pub async fn abort(&mut self, write_concern: &WriteConcern) -> CommandResponse {
        let Some(active) = self.active.as_mut() else {
            return self.commit_error(CommandError::no_such_transaction(
                "No transaction started on this session",
            ));
        };
        let txn = active.txn;
        if active.state == TransactionState::Committed {
            return CommandResponse::failed(CommandError::new(
                ErrorCode::TransactionCommitted,
                format!("Transaction {} has already been committed", txn),
            ));
        }
        if active.commit_outcome_unknown() && active.commit_type == Some(CommitType::TwoPhaseCommit)
        {
            return CommandResponse::failed(CommandError::new(
                ErrorCode::IllegalOperation,
                "Cannot abort after two-phase commit has begun; retry commitTransaction to learn \
                 the outcome",
            ));
        }

        active.registry.close();
        let participants = active.participant_ids();
        active.state = TransactionState::Aborted;
        active.coordinator_state = CoordinatorState::Aborted;
        active
            .abort_cause
            .get_or_insert_with(|| EXPLICIT_ABORT_CAUSE.to_string());

        let response = if participants.is_empty() {
            self.commit_error(CommandError::no_such_transaction(
                "no known command has been sent by this router for this transaction",
            ))
        } else {
            debug!(
                target: "shardtxn::txn",
                txn = %txn,
                participants = participants.len(),
                "Aborting transaction on all participants"
            );
            self.coordinator
                .abort(txn, &participants, write_concern)
                .await
        };
        self.end_tracking(TerminationCause::Aborted);
        response
    }

    fn end_tracking(&mut self, cause: TerminationCause) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.tracking_over {
            return;
        }
        active.tracking_over = true;
        active.ended_at = Some(Instant::now());

        match cause {
            TerminationCause::Committed => self.metrics.record_commit(
                active.commit_type.unwrap_or(CommitType::NoShards),
                active.commit_duration().unwrap_or_default(),
            ),
            TerminationCause::Aborted => self
                .metrics
                .record_abort(active.abort_cause.as_deref().unwrap_or("unknown")),
        }

        let duration = active.duration();
        if duration > self.coordinator.config().slow_transaction_threshold() {
            info!(
                target: "shardtxn::txn",
                txn = %active.txn,
                participants = active.registry.len(),
                commit_type = active.commit_type.map_or("notInitiated", |t| t.as_str()),
                coordinator = %active
                    .registry
                    .coordinator()
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                termination_cause = cause.as_str(),
                abort_cause = active.abort_cause.as_deref().unwrap_or(""),
                duration_micros = duration.as_micros() as u64,
                commit_duration_micros = active
                    .commit_duration()
                    .map_or(0, |d| d.as_micros() as u64),
                "Slow transaction"
            );
        }
    }
}
