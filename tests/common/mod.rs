//! Shared test utilities for integration tests.
//!
//! `KvCluster` is a toy partitioned key-value store with real transaction
//! semantics: writes are staged per transaction and only become visible
//! when the partition commits. Import via `mod common;`.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use shardtxn::{
    CommandError, CommandResponse, ErrorCode, LogicalTime, PartitionClient, PartitionId,
    ResponseMetadata, StatementFailure, StatementReply, StatementRequest, StatementResult, TxnId,
    WriteConcern,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Prepared,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct PartitionTxn {
    status: Status,
    staged: Vec<(String, Value)>,
}

#[derive(Debug, Default)]
struct Partition {
    data: BTreeMap<String, Value>,
    txns: HashMap<TxnId, PartitionTxn>,
}

/// In-process partitioned key-value store
#[derive(Debug, Default)]
pub struct KvCluster {
    partitions: Mutex<HashMap<PartitionId, Partition>>,
    refusing: Mutex<HashSet<PartitionId>>,
    clock: AtomicU64,
}

impl KvCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Committed value of `key` on `partition`
    pub fn value(&self, partition: &str, key: &str) -> Option<Value> {
        self.partitions
            .lock()
            .unwrap()
            .get(&PartitionId::new(partition))
            .and_then(|p| p.data.get(key).cloned())
    }

    /// Make `partition` refuse every prepare
    pub fn refuse_prepare(&self, partition: &str) {
        self.refusing
            .lock()
            .unwrap()
            .insert(PartitionId::new(partition));
    }

    /// Number of transactions `partition` still holds open
    pub fn open_transactions(&self, partition: &str) -> usize {
        self.partitions
            .lock()
            .unwrap()
            .get(&PartitionId::new(partition))
            .map_or(0, |p| {
                p.txns
                    .values()
                    .filter(|t| matches!(t.status, Status::Active | Status::Prepared))
                    .count()
            })
    }

    fn no_such_transaction(partition: &PartitionId, txn: TxnId) -> CommandError {
        CommandError::no_such_transaction(format!("{} has no transaction {}", partition, txn))
    }
}

#[async_trait]
impl PartitionClient for KvCluster {
    async fn run_statement(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        request: &StatementRequest,
    ) -> StatementResult {
        let mut partitions = self.partitions.lock().unwrap();
        let part = partitions.entry(partition.clone()).or_default();
        if request.start_transaction {
            part.txns.entry(txn).or_insert(PartitionTxn {
                status: Status::Active,
                staged: Vec::new(),
            });
        }
        let Some(state) = part.txns.get_mut(&txn) else {
            return Err(StatementFailure::new(Self::no_such_transaction(partition, txn)));
        };
        if state.status != Status::Active {
            return Err(StatementFailure::new(Self::no_such_transaction(partition, txn)));
        }

        let command = &request.command;
        if let Some(key) = command["put"].as_str() {
            state
                .staged
                .push((key.to_string(), command["value"].clone()));
            return Ok(StatementReply {
                result: json!({ "n": 1 }),
                metadata: ResponseMetadata::wrote(),
            });
        }
        if let Some(key) = command["get"].as_str() {
            let staged = state
                .staged
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone());
            let value = staged
                .or_else(|| part.data.get(key).cloned())
                .unwrap_or(Value::Null);
            return Ok(StatementReply {
                result: json!({ "value": value }),
                metadata: ResponseMetadata::read(),
            });
        }
        Err(StatementFailure::new(CommandError::new(
            ErrorCode::InvalidOptions,
            "unknown command",
        )))
    }

    async fn get_more(
        &self,
        _partition: &PartitionId,
        _txn: TxnId,
        _cursor_id: u64,
    ) -> StatementResult {
        Ok(StatementReply::with_metadata(ResponseMetadata::read()))
    }

    async fn prepare(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
    ) -> Result<LogicalTime, CommandError> {
        let refusing = self.refusing.lock().unwrap().contains(partition);
        let mut partitions = self.partitions.lock().unwrap();
        let state = partitions
            .get_mut(partition)
            .and_then(|p| p.txns.get_mut(&txn))
            .ok_or_else(|| Self::no_such_transaction(partition, txn))?;
        match state.status {
            Status::Active | Status::Prepared if refusing => {
                state.status = Status::Aborted;
                state.staged.clear();
                Err(CommandError::new(ErrorCode::WriteConflict, "prepare refused"))
            }
            Status::Active | Status::Prepared => {
                state.status = Status::Prepared;
                Ok(LogicalTime(self.clock.fetch_add(1, Ordering::SeqCst) + 1))
            }
            Status::Committed | Status::Aborted => Err(Self::no_such_transaction(partition, txn)),
        }
    }

    async fn commit(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
        _commit_timestamp: Option<LogicalTime>,
    ) -> CommandResponse {
        let mut partitions = self.partitions.lock().unwrap();
        let Some(part) = partitions.get_mut(partition) else {
            return CommandResponse::failed(Self::no_such_transaction(partition, txn));
        };
        let Some(state) = part.txns.get_mut(&txn) else {
            return CommandResponse::failed(Self::no_such_transaction(partition, txn));
        };
        match state.status {
            Status::Committed => CommandResponse::ok(),
            Status::Aborted => CommandResponse::failed(Self::no_such_transaction(partition, txn)),
            Status::Active | Status::Prepared => {
                state.status = Status::Committed;
                let staged = std::mem::take(&mut state.staged);
                part.data.extend(staged);
                CommandResponse::ok()
            }
        }
    }

    async fn abort(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
    ) -> CommandResponse {
        let mut partitions = self.partitions.lock().unwrap();
        let Some(state) = partitions
            .get_mut(partition)
            .and_then(|p| p.txns.get_mut(&txn))
        else {
            return CommandResponse::ok();
        };
        if state.status == Status::Committed {
            return CommandResponse::failed(CommandError::new(
                ErrorCode::TransactionCommitted,
                "already committed",
            ));
        }
        state.status = Status::Aborted;
        state.staged.clear();
        CommandResponse::ok()
    }

    async fn recover_decision(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        _write_concern: &WriteConcern,
    ) -> CommandResponse {
        let partitions = self.partitions.lock().unwrap();
        let committed = partitions
            .get(partition)
            .and_then(|p| p.txns.get(&txn))
            .is_some_and(|t| t.status == Status::Committed);
        if committed {
            CommandResponse::ok()
        } else {
            CommandResponse::failed(Self::no_such_transaction(partition, txn))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn p(name: &str) -> PartitionId {
    PartitionId::new(name)
}

pub fn put(key: &str, value: i64) -> Value {
    json!({ "put": key, "value": value })
}

pub fn get(key: &str) -> Value {
    json!({ "get": key })
}
