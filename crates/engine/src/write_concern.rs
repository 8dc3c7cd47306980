//! Write concern evaluation and response shaping
//!
//! Decides which of the three reply shapes a commit or abort produces and
//! which error labels it carries:
//!
//! | Situation | Shape | Labels |
//! |-----------|-------|--------|
//! | Invalid write concern on a coordinator-evaluated path | success + WCE | none |
//! | Durability WCE on a read-only commit | failure `WriteConcernFailed` | `RetryableWriteError` |
//! | Retryable code from commit/abort | failure | `RetryableWriteError` |
//! | Transient code from a statement | failure | `TransientTransactionError` |
//! | Transaction aborted everywhere during commit | failure | `TransientTransactionError` |

use shardtxn_core::{
    CommandError, CommandResponse, ErrorCode, ErrorLabel, PartitionId, WriteConcern,
    WriteConcernError, WriteConcernPolicy,
};

/// What kind of operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureContext {
    /// A statement inside the transaction
    Statement,
    /// `commitTransaction` or `abortTransaction`
    CommitOrAbort,
    /// A commit that gave up and aborted the transaction on every participant
    AbortedEverywhere,
}

/// Validates client write concerns and shapes commit replies
#[derive(Debug, Clone, Default)]
pub struct WriteConcernEvaluator {
    policy: WriteConcernPolicy,
}

impl WriteConcernEvaluator {
    /// Evaluator for a deployment
    pub fn new(policy: WriteConcernPolicy) -> Self {
        Self { policy }
    }

    /// Deployment policy in use
    pub fn policy(&self) -> &WriteConcernPolicy {
        &self.policy
    }

    /// Check a client write concern
    pub fn validate(&self, write_concern: &WriteConcern) -> Result<(), WriteConcernError> {
        write_concern.validate(&self.policy)
    }

    /// Success reply for a path where the router itself evaluates the write
    /// concern (no shards, read-only, two-phase)
    ///
    /// An invalid write concern becomes an annotation, never a failure.
    pub fn coordinator_success(&self, write_concern: &WriteConcern) -> CommandResponse {
        match self.validate(write_concern) {
            Ok(()) => CommandResponse::ok(),
            Err(wce) => CommandResponse::ok_with_write_concern_error(wce),
        }
    }

    /// Attach the labels `context` calls for
    pub fn label(&self, error: CommandError, context: FailureContext) -> CommandError {
        match context {
            FailureContext::Statement => {
                if error.code.is_transient_transaction_error() {
                    error.with_label(ErrorLabel::TransientTransactionError)
                } else {
                    error
                }
            }
            FailureContext::CommitOrAbort => {
                let error = if error.code.is_retryable_write_error() {
                    error.with_label(ErrorLabel::RetryableWriteError)
                } else {
                    error
                };
                if error.code == ErrorCode::NoSuchTransaction {
                    error.with_label(ErrorLabel::TransientTransactionError)
                } else {
                    error
                }
            }
            FailureContext::AbortedEverywhere => error
                .without_labels()
                .with_label(ErrorLabel::TransientTransactionError),
        }
    }

    /// Label the failure of a commit/abort reply, if any
    ///
    /// Write concern errors on successful replies stay unlabelled.
    pub fn label_commit_response(&self, response: CommandResponse) -> CommandResponse {
        match response.error {
            Some(error) => CommandResponse::failed(self.label(error, FailureContext::CommitOrAbort)),
            None => response,
        }
    }

    /// Combine the participant replies of a read-only commit
    ///
    /// Replies are in contact order. The first command error wins; then the
    /// first durability write concern error becomes a retryable
    /// `WriteConcernFailed` failure; any remaining write concern error (an
    /// invalid write concern echoed by a participant) is an annotation.
    pub fn read_only_outcome(
        &self,
        write_concern: &WriteConcern,
        replies: Vec<(PartitionId, CommandResponse)>,
    ) -> CommandResponse {
        let mut durability_failure = None;
        let mut annotation = None;

        for (_, reply) in replies {
            if let Some(error) = reply.error {
                return CommandResponse::failed(self.label(error, FailureContext::CommitOrAbort));
            }
            match reply.write_concern_error {
                Some(wce) if wce.code == ErrorCode::WriteConcernFailed => {
                    durability_failure.get_or_insert(wce);
                }
                Some(wce) => {
                    annotation.get_or_insert(wce);
                }
                None => {}
            }
        }

        if let Some(wce) = durability_failure {
            return CommandResponse::failed(
                self.label(wce.into_command_error(), FailureContext::CommitOrAbort),
            );
        }
        match annotation {
            Some(wce) => CommandResponse::ok_with_write_concern_error(wce),
            None => self.coordinator_success(write_concern),
        }
    }

    /// First failure of a single-write-shard read phase, as a command error
    ///
    /// A write concern error is promoted to a command error with the same
    /// code. Returns `None` if every read-only participant committed cleanly.
    pub fn read_phase_failure(
        &self,
        replies: Vec<(PartitionId, CommandResponse)>,
    ) -> Option<(PartitionId, CommandError)> {
        replies.into_iter().find_map(|(partition, reply)| {
            let error = match (reply.error, reply.write_concern_error) {
                (Some(error), _) => error,
                (None, Some(wce)) => wce.into_command_error(),
                (None, None) => return None,
            };
            Some((partition, self.label(error, FailureContext::AbortedEverywhere)))
        })
    }
}
