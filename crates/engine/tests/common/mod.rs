//! Shared test utilities for engine integration tests.
//!
//! `MockCluster` is an in-process set of partitions implementing
//! `PartitionClient`. Every RPC it receives is stamped with a global
//! sequence number so tests can assert receipt order across partitions.
//! Import via `mod common;`.

#![allow(dead_code)]

use async_trait::async_trait;
use shardtxn_core::{
    CommandError, CommandResponse, ErrorCode, LogicalTime, PartitionId, ResponseMetadata,
    SessionId, TxnId, WriteConcern,
};
use shardtxn_durability::{DecisionLog, InMemoryDecisionLog};
use shardtxn_engine::{
    CoordinatorConfig, PartitionClient, StatementReply, StatementRequest, StatementResult,
    TransactionAction, TransactionRouter, TransactionService,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock cluster
// ============================================================================

/// One RPC as received by a partition
#[derive(Debug, Clone, PartialEq)]
pub enum Rpc {
    Statement {
        stmt_id: u32,
        start_transaction: bool,
    },
    GetMore {
        cursor_id: u64,
    },
    Prepare,
    Commit {
        commit_ts: Option<LogicalTime>,
        write_concern: WriteConcern,
    },
    Abort,
    RecoverDecision,
}

#[derive(Debug, Clone)]
pub struct Received {
    pub seq: u64,
    pub partition: PartitionId,
    pub txn: TxnId,
    pub rpc: Rpc,
}

/// Transaction state held by one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTxnState {
    Active,
    Prepared(LogicalTime),
    Committed,
    Aborted,
}

/// How a partition answers `prepareTransaction`
pub enum PrepareBehavior {
    Vote(LogicalTime),
    Refuse(ErrorCode),
    /// Never answers in any reasonable time
    Hang,
}

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    received: Vec<Received>,
    states: HashMap<(PartitionId, TxnId), PartitionTxnState>,
    statement_replies: HashMap<PartitionId, VecDeque<StatementResult>>,
    get_more_replies: HashMap<PartitionId, VecDeque<StatementResult>>,
    prepare: HashMap<PartitionId, PrepareBehavior>,
    commit_replies: HashMap<PartitionId, VecDeque<CommandResponse>>,
    recover_replies: HashMap<PartitionId, VecDeque<CommandResponse>>,
    decision_durable_at_commit: Vec<bool>,
}

#[derive(Default)]
pub struct MockCluster {
    inner: Mutex<Inner>,
    seq: AtomicU64,
    prepare_hooks: Mutex<HashMap<PartitionId, Hook>>,
    decisions: Mutex<Option<Arc<dyn DecisionLog>>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, partition: &PartitionId, txn: TxnId, rpc: Rpc) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.lock().unwrap().received.push(Received {
            seq,
            partition: partition.clone(),
            txn,
            rpc,
        });
        seq
    }

    /// Next `run_statement` on `partition` returns `result`
    pub fn script_statement(&self, partition: &str, result: StatementResult) {
        self.inner
            .lock()
            .unwrap()
            .statement_replies
            .entry(p(partition))
            .or_default()
            .push_back(result);
    }

    /// Next `get_more` on `partition` returns `result`
    pub fn script_get_more(&self, partition: &str, result: StatementResult) {
        self.inner
            .lock()
            .unwrap()
            .get_more_replies
            .entry(p(partition))
            .or_default()
            .push_back(result);
    }

    pub fn set_prepare(&self, partition: &str, behavior: PrepareBehavior) {
        self.inner
            .lock()
            .unwrap()
            .prepare
            .insert(p(partition), behavior);
    }

    /// Next `commit` on `partition` returns `response`
    pub fn script_commit(&self, partition: &str, response: CommandResponse) {
        self.inner
            .lock()
            .unwrap()
            .commit_replies
            .entry(p(partition))
            .or_default()
            .push_back(response);
    }

    /// Next `recover_decision` on `partition` returns `response`
    pub fn script_recover(&self, partition: &str, response: CommandResponse) {
        self.inner
            .lock()
            .unwrap()
            .recover_replies
            .entry(p(partition))
            .or_default()
            .push_back(response);
    }

    /// Run `hook` whenever `partition` receives `prepareTransaction`
    pub fn on_prepare(&self, partition: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.prepare_hooks
            .lock()
            .unwrap()
            .insert(p(partition), Box::new(hook));
    }

    /// Check `log` each time a participant receives a decided commit
    pub fn watch_decisions(&self, log: Arc<dyn DecisionLog>) {
        *self.decisions.lock().unwrap() = Some(log);
    }

    /// Whether the decision was durable at each decided commit, in receipt order
    pub fn decision_durable_at_commit(&self) -> Vec<bool> {
        self.inner.lock().unwrap().decision_durable_at_commit.clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.inner.lock().unwrap().received.clone()
    }

    pub fn received_by(&self, partition: &str) -> Vec<Rpc> {
        let partition = p(partition);
        self.received()
            .into_iter()
            .filter(|r| r.partition == partition)
            .map(|r| r.rpc)
            .collect()
    }

    /// Sequence numbers of RPCs to `partition` matching `pred`
    pub fn seqs(&self, partition: &str, pred: impl Fn(&Rpc) -> bool) -> Vec<u64> {
        let partition = p(partition);
        self.received()
            .into_iter()
            .filter(|r| r.partition == partition && pred(&r.rpc))
            .map(|r| r.seq)
            .collect()
    }

    pub fn commits(&self, partition: &str) -> Vec<u64> {
        self.seqs(partition, |rpc| matches!(rpc, Rpc::Commit { .. }))
    }

    pub fn prepares(&self, partition: &str) -> Vec<u64> {
        self.seqs(partition, |rpc| matches!(rpc, Rpc::Prepare))
    }

    pub fn aborts(&self, partition: &str) -> Vec<u64> {
        self.seqs(partition, |rpc| matches!(rpc, Rpc::Abort))
    }

    pub fn state(&self, partition: &str, txn: TxnId) -> Option<PartitionTxnState> {
        self.inner
            .lock()
            .unwrap()
            .states
            .get(&(p(partition), txn))
            .copied()
    }

    fn set_state(&self, partition: &PartitionId, txn: TxnId, state: PartitionTxnState) {
        self.inner
            .lock()
            .unwrap()
            .states
            .insert((partition.clone(), txn), state);
    }
}

#[async_trait]
impl PartitionClient for MockCluster {
    async fn run_statement(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        request: &StatementRequest,
    ) -> StatementResult {
        self.record(
            partition,
            txn,
            Rpc::Statement {
                stmt_id: request.stmt_id,
                start_transaction: request.start_transaction,
            },
        );
        let mut inner = self.inner.lock().unwrap();
        inner
            .states
            .entry((partition.clone(), txn))
            .or_insert(PartitionTxnState::Active);
        if let Some(result) = inner
            .statement_replies
            .get_mut(partition)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        let metadata = if request.command["write"] == true {
            ResponseMetadata::wrote()
        } else {
            ResponseMetadata::read()
        };
        Ok(StatementReply::with_metadata(metadata))
    }

    async fn get_more(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        cursor_id: u64,
    ) -> StatementResult {
        self.record(partition, txn, Rpc::GetMore { cursor_id });
        self.inner
            .lock()
            .unwrap()
            .get_more_replies
            .get_mut(partition)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(StatementReply::default()))
    }

    async fn prepare(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
    ) -> Result<LogicalTime, CommandError> {
        let seq = self.record(partition, txn, Rpc::Prepare);
        if let Some(hook) = self.prepare_hooks.lock().unwrap().get(partition) {
            hook();
        }

        enum Answer {
            Vote(LogicalTime),
            Refuse(ErrorCode),
            Hang,
        }
        let answer = {
            let inner = self.inner.lock().unwrap();
            if inner.states.get(&(partition.clone(), txn)) == Some(&PartitionTxnState::Aborted) {
                Answer::Refuse(ErrorCode::NoSuchTransaction)
            } else {
                match inner.prepare.get(partition) {
                    Some(PrepareBehavior::Vote(ts)) => Answer::Vote(*ts),
                    Some(PrepareBehavior::Refuse(code)) => Answer::Refuse(*code),
                    Some(PrepareBehavior::Hang) => Answer::Hang,
                    None => Answer::Vote(LogicalTime(seq)),
                }
            }
        };

        match answer {
            Answer::Vote(ts) => {
                self.set_state(partition, txn, PartitionTxnState::Prepared(ts));
                Ok(ts)
            }
            Answer::Refuse(code) => {
                self.set_state(partition, txn, PartitionTxnState::Aborted);
                Err(CommandError::new(code, format!("{} refused to prepare", partition)))
            }
            Answer::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(LogicalTime(seq))
            }
        }
    }

    async fn commit(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        write_concern: &WriteConcern,
        commit_timestamp: Option<LogicalTime>,
    ) -> CommandResponse {
        self.record(
            partition,
            txn,
            Rpc::Commit {
                commit_ts: commit_timestamp,
                write_concern: write_concern.clone(),
            },
        );
        if commit_timestamp.is_some() {
            let log = self.decisions.lock().unwrap().clone();
            if let Some(log) = log {
                let durable = log.get(&txn).is_some();
                self.inner
                    .lock()
                    .unwrap()
                    .decision_durable_at_commit
                    .push(durable);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        let key = (partition.clone(), txn);
        if let Some(response) = inner
            .commit_replies
            .get_mut(partition)
            .and_then(VecDeque::pop_front)
        {
            if response.is_ok() {
                inner.states.insert(key, PartitionTxnState::Committed);
            }
            return response;
        }
        if inner.states.get(&key) == Some(&PartitionTxnState::Aborted) {
            return CommandResponse::failed(CommandError::no_such_transaction(format!(
                "{} already aborted {}",
                partition, txn
            )));
        }
        inner.states.insert(key, PartitionTxnState::Committed);
        CommandResponse::ok()
    }

    async fn abort(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
    ) -> CommandResponse {
        self.record(partition, txn, Rpc::Abort);
        let mut inner = self.inner.lock().unwrap();
        let key = (partition.clone(), txn);
        if inner.states.get(&key) == Some(&PartitionTxnState::Committed) {
            return CommandResponse::failed(CommandError::new(
                ErrorCode::TransactionCommitted,
                format!("{} already committed {}", partition, txn),
            ));
        }
        inner.states.insert(key, PartitionTxnState::Aborted);
        CommandResponse::ok()
    }

    async fn recover_decision(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
    ) -> CommandResponse {
        self.record(partition, txn, Rpc::RecoverDecision);
        let mut inner = self.inner.lock().unwrap();
        if let Some(response) = inner
            .recover_replies
            .get_mut(partition)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        match inner.states.get(&(partition.clone(), txn)) {
            Some(PartitionTxnState::Committed) => CommandResponse::ok(),
            _ => CommandResponse::failed(CommandError::no_such_transaction(format!(
                "{} has no committed transaction {}",
                partition, txn
            ))),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn p(name: &str) -> PartitionId {
    PartitionId::new(name)
}

pub fn read() -> serde_json::Value {
    serde_json::json!({ "find": "coll", "write": false })
}

pub fn write() -> serde_json::Value {
    serde_json::json!({ "insert": "coll", "write": true })
}

/// In-memory service over `cluster` with default configuration
pub fn service(cluster: &Arc<MockCluster>) -> TransactionService {
    TransactionService::cache(cluster.clone())
}

/// Service over `cluster` with `config`; returns the decision log too
pub fn service_with(
    cluster: &Arc<MockCluster>,
    config: CoordinatorConfig,
) -> (TransactionService, Arc<InMemoryDecisionLog>) {
    let log = Arc::new(InMemoryDecisionLog::new());
    let service = TransactionService::with_parts(cluster.clone(), log.clone(), config);
    (service, log)
}

/// Fresh router with transaction number 1 started
pub fn started_router(service: &TransactionService) -> TransactionRouter {
    let mut router = TransactionRouter::new(
        SessionId::new(),
        service.coordinator().clone(),
        Arc::clone(service.metrics()),
    );
    router
        .begin_or_continue(1, TransactionAction::Start)
        .unwrap();
    router
}

/// Poll `cond` for up to one second
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
