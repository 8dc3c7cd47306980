//! Participant tracking and commit classification for shardtxn
//!
//! This crate owns per-transaction participant state:
//! - Participant: a contacted partition and its read/write status
//! - ParticipantRegistry: the thread-safe participant set of one transaction
//! - CommitProtocol / CommitPlan: the commit path chosen at commit time
//! - RecoveryToken: names the partition that can report the commit outcome

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod participant;
pub mod recovery;
pub mod registry;

pub use classifier::{classify, CommitPlan, CommitProtocol, CommitType};
pub use participant::{Access, Participant, ParticipantSource, ReadStatus};
pub use recovery::RecoveryToken;
pub use registry::{
    AddOutcome, MetadataReport, ParticipantRegistry, RegistryPhase, ResponseContext,
};
