//! Durability layer for shardtxn
//!
//! This crate owns everything that touches disk:
//!
//! - CommitDecision: the coordinator's write-once two-phase commit outcome
//! - DecisionLog: in-memory and append-only file implementations
//! - Durability modes: Always (default), Cache
//! - Binary record format with CRC32 and torn-tail recovery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decision;
pub mod log;
pub mod mode;
pub mod record;

pub use decision::{CommitDecision, Outcome, Vote};
pub use log::{DecisionLog, FileDecisionLog, InMemoryDecisionLog, PersistOutcome};
pub use mode::DurabilityMode;
pub use record::{RecordError, DECISION_RECORD_FORMAT_VERSION};
