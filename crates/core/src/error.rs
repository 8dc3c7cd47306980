//! Error types for shardtxn
//!
//! Two layers of errors live here:
//! - [`Error`]: infrastructure failures (I/O, serialization, registry misuse).
//!   These never reach a client directly.
//! - [`CommandError`]: the client-visible result of a failed command, carrying
//!   an [`ErrorCode`] and the [`ErrorLabel`]s that tell the client what it may
//!   safely retry.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{PartitionId, TxnId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for shardtxn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure error types
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (decision log file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The participant set no longer accepts this mutation (commit has begun)
    #[error("Participant registry for {txn} is closed")]
    RegistryClosed {
        /// Transaction whose registry is closed
        txn: TxnId,
    },

    /// A partition claimed to be read-only after having written
    #[error("Participant {partition} claimed to be read-only after previously writing")]
    ReadOnlyRegression {
        /// Offending partition
        partition: PartitionId,
    },

    /// A participant never reported whether it wrote
    #[error("Participant {partition} has no resolved read/write status")]
    UnresolvedParticipant {
        /// Partition whose statement never resolved
        partition: PartitionId,
    },

    /// A different decision is already persisted for this transaction
    #[error("Conflicting commit decision for {txn}")]
    DecisionConflict {
        /// Transaction with the conflicting decision
        txn: TxnId,
    },
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

/// Client-visible error codes
///
/// Names match the code strings reported to clients and used as abort causes
/// in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Generic internal failure
    InternalError,
    /// Malformed or disallowed option values
    InvalidOptions,
    /// Operation not permitted in the current state
    IllegalOperation,
    /// The transaction is unknown or was already aborted
    NoSuchTransaction,
    /// The txn number is older than the session's current one
    TransactionTooOld,
    /// The transaction already committed
    TransactionCommitted,
    /// A transaction with this number is already in progress
    ConflictingOperationInProgress,
    /// Durability requirement not satisfied in time
    WriteConcernFailed,
    /// Write concern names an unknown mode/tag
    UnknownReplWriteConcern,
    /// Write concern asks for more nodes than exist
    UnsatisfiableWriteConcern,
    /// The target namespace is a view and the request must be rewritten
    CommandOnShardedViewNotSupportedOnMongod,
    /// Operation was interrupted
    Interrupted,
    /// Operation was interrupted by shutdown
    InterruptedAtShutdown,
    /// Operation was interrupted by a replica-set state change
    InterruptedDueToReplStateChange,
    /// The node is shutting down
    ShutdownInProgress,
    /// The target is not the primary
    NotWritablePrimary,
    /// The primary stepped down during the operation
    PrimarySteppedDown,
    /// The partition could not be reached
    HostUnreachable,
    /// The request timed out on the network
    NetworkTimeout,
    /// The operation exceeded its time limit
    ExceededTimeLimit,
    /// Conflicting concurrent write
    WriteConflict,
    /// Lock acquisition timed out
    LockTimeout,
    /// Routing information was stale
    StaleConfig,
    /// Unique index violation
    DuplicateKey,
}

impl ErrorCode {
    /// Code string as reported to clients
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidOptions => "InvalidOptions",
            ErrorCode::IllegalOperation => "IllegalOperation",
            ErrorCode::NoSuchTransaction => "NoSuchTransaction",
            ErrorCode::TransactionTooOld => "TransactionTooOld",
            ErrorCode::TransactionCommitted => "TransactionCommitted",
            ErrorCode::ConflictingOperationInProgress => "ConflictingOperationInProgress",
            ErrorCode::WriteConcernFailed => "WriteConcernFailed",
            ErrorCode::UnknownReplWriteConcern => "UnknownReplWriteConcern",
            ErrorCode::UnsatisfiableWriteConcern => "UnsatisfiableWriteConcern",
            ErrorCode::CommandOnShardedViewNotSupportedOnMongod => {
                "CommandOnShardedViewNotSupportedOnMongod"
            }
            ErrorCode::Interrupted => "Interrupted",
            ErrorCode::InterruptedAtShutdown => "InterruptedAtShutdown",
            ErrorCode::InterruptedDueToReplStateChange => "InterruptedDueToReplStateChange",
            ErrorCode::ShutdownInProgress => "ShutdownInProgress",
            ErrorCode::NotWritablePrimary => "NotWritablePrimary",
            ErrorCode::PrimarySteppedDown => "PrimarySteppedDown",
            ErrorCode::HostUnreachable => "HostUnreachable",
            ErrorCode::NetworkTimeout => "NetworkTimeout",
            ErrorCode::ExceededTimeLimit => "ExceededTimeLimit",
            ErrorCode::WriteConflict => "WriteConflict",
            ErrorCode::LockTimeout => "LockTimeout",
            ErrorCode::StaleConfig => "StaleConfig",
            ErrorCode::DuplicateKey => "DuplicateKey",
        }
    }

    /// Failures after which an interrupted commit/abort may simply be resent
    pub fn is_retryable_write_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::Interrupted
                | ErrorCode::InterruptedAtShutdown
                | ErrorCode::InterruptedDueToReplStateChange
                | ErrorCode::ShutdownInProgress
                | ErrorCode::NotWritablePrimary
                | ErrorCode::PrimarySteppedDown
                | ErrorCode::HostUnreachable
                | ErrorCode::NetworkTimeout
                | ErrorCode::ExceededTimeLimit
                | ErrorCode::WriteConcernFailed
        )
    }

    /// Failures after which the whole transaction may be retried from the start
    pub fn is_transient_transaction_error(&self) -> bool {
        match self {
            ErrorCode::NoSuchTransaction
            | ErrorCode::WriteConflict
            | ErrorCode::LockTimeout
            | ErrorCode::StaleConfig => true,
            ErrorCode::WriteConcernFailed => false,
            other => other.is_retryable_write_error(),
        }
    }

    /// Codes that describe a write-concern problem rather than a command failure
    pub fn is_write_concern_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::WriteConcernFailed
                | ErrorCode::UnknownReplWriteConcern
                | ErrorCode::UnsatisfiableWriteConcern
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels attached to command failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorLabel {
    /// The whole transaction can be retried from its first statement
    TransientTransactionError,
    /// This commit/abort call can be resent without restarting the transaction
    RetryableWriteError,
}

impl ErrorLabel {
    /// Label string as reported to clients
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLabel::TransientTransactionError => "TransientTransactionError",
            ErrorLabel::RetryableWriteError => "RetryableWriteError",
        }
    }
}

/// A failed command as seen by the client
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CommandError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Retry guidance for the client
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<ErrorLabel>,
}

impl CommandError {
    /// Create an unlabelled error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            labels: Vec::new(),
        }
    }

    /// Shorthand for `NoSuchTransaction`
    pub fn no_such_transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoSuchTransaction, message)
    }

    /// Add a label (no duplicates)
    pub fn with_label(mut self, label: ErrorLabel) -> Self {
        if !self.labels.contains(&label) {
            self.labels.push(label);
            self.labels.sort();
        }
        self
    }

    /// Drop all labels
    pub fn without_labels(mut self) -> Self {
        self.labels.clear();
        self
    }

    /// Whether the error carries `label`
    pub fn has_label(&self, label: ErrorLabel) -> bool {
        self.labels.contains(&label)
    }
}

impl From<Error> for CommandError {
    fn from(e: Error) -> Self {
        let code = match &e {
            Error::RegistryClosed { .. } | Error::ReadOnlyRegression { .. } => {
                ErrorCode::IllegalOperation
            }
            Error::UnresolvedParticipant { .. } => ErrorCode::NoSuchTransaction,
            Error::Config(_) => ErrorCode::InvalidOptions,
            Error::InvalidOperation(_) => ErrorCode::IllegalOperation,
            Error::IoError(_)
            | Error::SerializationError(_)
            | Error::Corruption(_)
            | Error::DecisionConflict { .. } => ErrorCode::InternalError,
        };
        CommandError::new(code, e.to_string())
    }
}
