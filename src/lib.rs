//! shardtxn - commit coordination for transactions spanning partitions
//!
//! A router sits in front of a partitioned cluster. It forwards the
//! statements of each session's transaction to the partitions that own the
//! data, remembers which partitions took part and whether they wrote, and
//! at commit time picks the cheapest protocol that is still atomic:
//!
//! | Participants | Protocol |
//! |--------------|----------|
//! | none | answered by the router |
//! | one | forwarded commit |
//! | several, none wrote | parallel commit |
//! | several, one wrote | readers first, then the writer |
//! | several writers | two-phase commit with a durable decision |
//!
//! # Quick Start
//!
//! ```ignore
//! use shardtxn::{TransactionAction, TransactionService, WriteConcern};
//!
//! let service = TransactionService::open(client, "/var/lib/shardtxn")?;
//! let router = service.router(session);
//! let mut router = router.lock().await;
//!
//! router.begin_or_continue(1, TransactionAction::Start)?;
//! router.run_statement(&targets, command).await?;
//! let reply = router.commit(&WriteConcern::majority(), None).await;
//! ```
//!
//! # Architecture
//!
//! Partitions are reached only through a [`PartitionClient`]. Everything
//! else (participant tracking, classification, the decision log) is
//! internal to the engine and re-exported here for inspection.

pub use shardtxn_concurrency::{
    CommitPlan, CommitProtocol, CommitType, Participant, ParticipantSource, ReadStatus,
    RecoveryToken,
};
pub use shardtxn_core::{
    AdditionalParticipant, CommandError, CommandResponse, Error, ErrorCode, ErrorLabel,
    LogicalTime, PartitionId, ResponseMetadata, Result, SessionId, TxnId, WriteConcern,
    WriteConcernError, WriteConcernPolicy, WriteMode,
};
pub use shardtxn_durability::{
    CommitDecision, DecisionLog, DurabilityMode, FileDecisionLog, InMemoryDecisionLog, Outcome,
    Vote,
};
pub use shardtxn_engine::*;
