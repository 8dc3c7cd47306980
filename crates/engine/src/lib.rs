//! Transaction routing and commit coordination for shardtxn
//!
//! This crate ties the lower layers together:
//! - TransactionService: session catalog, one router per session
//! - TransactionRouter: statement dispatch, participant tracking, commit/abort
//! - CommitCoordinator: runs the commit protocol chosen at classification
//! - WriteConcernEvaluator: shapes commit replies and error labels
//! - RouterMetrics: process-wide transaction counters
//!
//! The engine is the only component that talks to partitions, always through
//! a [`PartitionClient`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod router;
pub mod service;
pub mod transport;
pub mod write_concern;

pub use config::{CoordinatorConfig, CONFIG_FILE_NAME};
pub use coordinator::{CommitCoordinator, CoordinatorState};
pub use metrics::{CommitTypeStats, MetricsSnapshot, RouterMetrics, EXPLICIT_ABORT_CAUSE};
pub use router::{
    ParticipantSink, StatementOutcome, TransactionAction, TransactionRouter, TransactionState,
};
pub use service::{SessionRouter, TransactionService, DECISION_LOG_FILE_NAME};
pub use transport::{
    PartitionClient, ResolvedView, StatementFailure, StatementReply, StatementRequest,
    StatementResult,
};
pub use write_concern::{FailureContext, WriteConcernEvaluator};
