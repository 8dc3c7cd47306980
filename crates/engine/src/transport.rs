//! Partition transport boundary
//!
//! The router never talks to storage directly. Every partition RPC goes
//! through a [`PartitionClient`], so deployments plug in their network layer
//! and tests plug in an in-process cluster.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shardtxn_core::{
    CommandError, CommandResponse, ErrorCode, LogicalTime, PartitionId, ResponseMetadata, TxnId,
    WriteConcern,
};

/// One statement sent to one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRequest {
    /// Opaque command body
    pub command: serde_json::Value,
    /// First contact with this partition in the transaction
    pub start_transaction: bool,
    /// Statement id within the transaction
    pub stmt_id: u32,
}

/// Successful statement or `getMore` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementReply {
    /// Opaque result body
    #[serde(default)]
    pub result: serde_json::Value,
    /// Transaction metadata
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl StatementReply {
    /// Reply carrying only metadata
    pub fn with_metadata(metadata: ResponseMetadata) -> Self {
        Self {
            result: serde_json::Value::Null,
            metadata,
        }
    }
}

/// A statement must be rewritten against the resolved view definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedView {
    /// Partitions owning the underlying collection
    pub targets: Vec<PartitionId>,
    /// Rewritten command
    pub command: serde_json::Value,
}

/// Failed statement or `getMore` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementFailure {
    /// The error
    pub error: CommandError,
    /// Metadata reported alongside the error
    #[serde(default)]
    pub metadata: ResponseMetadata,
    /// Present on view-resolution errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_view: Option<ResolvedView>,
}

impl StatementFailure {
    /// Failure without metadata
    pub fn new(error: CommandError) -> Self {
        Self {
            error,
            metadata: ResponseMetadata::default(),
            resolved_view: None,
        }
    }

    /// View-resolution failure
    pub fn view_resolution(view: ResolvedView) -> Self {
        Self {
            error: CommandError::new(
                ErrorCode::CommandOnShardedViewNotSupportedOnMongod,
                "Resolved views on sharded collections must be executed by the router",
            ),
            metadata: ResponseMetadata::default(),
            resolved_view: Some(view),
        }
    }
}

/// Outcome of a statement or `getMore`
pub type StatementResult = Result<StatementReply, StatementFailure>;

/// RPC surface of a backend partition
#[async_trait]
pub trait PartitionClient: Send + Sync {
    /// Run one statement of a transaction
    async fn run_statement(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        request: &StatementRequest,
    ) -> StatementResult;

    /// Fetch the next batch of an open cursor
    async fn get_more(&self, partition: &PartitionId, txn: TxnId, cursor_id: u64)
        -> StatementResult;

    /// `prepareTransaction`; returns the prepare timestamp
    async fn prepare(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        write_concern: &WriteConcern,
    ) -> Result<LogicalTime, CommandError>;

    /// `commitTransaction`, with the decided timestamp under two-phase commit
    async fn commit(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        write_concern: &WriteConcern,
        commit_timestamp: Option<LogicalTime>,
    ) -> CommandResponse;

    /// `abortTransaction`
    async fn abort(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        write_concern: &WriteConcern,
    ) -> CommandResponse;

    /// Ask a partition for the outcome of a transaction it coordinated
    async fn recover_decision(
        &self,
        partition: &PartitionId,
        txn: TxnId,
        write_concern: &WriteConcern,
    ) -> CommandResponse;
}
