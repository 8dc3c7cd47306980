//! Core types for shardtxn
//!
//! This crate defines the foundational types shared by every layer:
//! - SessionId / TxnId: transaction identity `(lsid, txnNumber)`
//! - PartitionId: an independently addressable backend ("shard")
//! - LogicalTime: prepare/commit timestamps
//! - ResponseMetadata: transaction metadata a partition attaches to replies
//! - WriteConcern: client durability requirements and their validation policy
//! - CommandError / CommandResponse: client-visible results and error labels
//! - Error: infrastructure error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod metadata;
pub mod response;
pub mod types;
pub mod write_concern;

pub use error::{CommandError, Error, ErrorCode, ErrorLabel, Result};
pub use metadata::{AdditionalParticipant, ResponseMetadata};
pub use response::{CommandResponse, ResponseShape, WriteConcernError};
pub use types::{LogicalTime, PartitionId, SessionId, TxnId};
pub use write_concern::{WriteConcern, WriteConcernPolicy, WriteMode};
