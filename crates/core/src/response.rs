//! Client-visible command results
//!
//! A commit or abort reply takes one of three shapes: plain success, success
//! that could not be confirmed durable (a write concern error rides along), or
//! a command failure with labels.

use crate::error::{CommandError, ErrorCode, ErrorLabel};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Write concern failure attached to an otherwise successful reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcernError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

impl WriteConcernError {
    /// Create a write concern error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `WriteConcernFailed` with the usual wtimeout message
    pub fn timed_out() -> Self {
        Self::new(ErrorCode::WriteConcernFailed, "waiting for replication timed out")
    }

    /// Promote to a command failure
    pub fn into_command_error(self) -> CommandError {
        CommandError::new(self.code, self.message)
    }
}

impl fmt::Display for WriteConcernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Which of the three reply shapes a response has
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `ok: 1`
    Success,
    /// `ok: 1` with a `writeConcernError`
    SuccessWithWriteConcernError,
    /// `ok: 0`
    Failure,
}

/// Reply to a client command
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Command failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    /// Durability failure on an otherwise successful command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern_error: Option<WriteConcernError>,
}

impl CommandResponse {
    /// Plain success
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success whose durability could not be confirmed
    pub fn ok_with_write_concern_error(wce: WriteConcernError) -> Self {
        Self {
            error: None,
            write_concern_error: Some(wce),
        }
    }

    /// Command failure
    pub fn failed(error: CommandError) -> Self {
        Self {
            error: Some(error),
            write_concern_error: None,
        }
    }

    /// Reply shape
    pub fn shape(&self) -> ResponseShape {
        match (&self.error, &self.write_concern_error) {
            (Some(_), _) => ResponseShape::Failure,
            (None, Some(_)) => ResponseShape::SuccessWithWriteConcernError,
            (None, None) => ResponseShape::Success,
        }
    }

    /// `ok: 1`
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the error carries `label`
    pub fn has_label(&self, label: ErrorLabel) -> bool {
        self.error.as_ref().is_some_and(|e| e.has_label(label))
    }

    /// Error code of the failure or, failing that, of the write concern error
    pub fn code(&self) -> Option<ErrorCode> {
        self.error
            .as_ref()
            .map(|e| e.code)
            .or_else(|| self.write_concern_error.as_ref().map(|w| w.code))
    }

    /// Whether the outcome is definite enough to replay on a retried call
    ///
    /// A write concern error or a retryable failure leaves the durable outcome
    /// unknown, so such replies must be recomputed rather than replayed.
    pub fn is_definite(&self) -> bool {
        match self.shape() {
            ResponseShape::Success => true,
            ResponseShape::SuccessWithWriteConcernError => false,
            ResponseShape::Failure => !self.has_label(ErrorLabel::RetryableWriteError),
        }
    }
}

impl From<CommandError> for CommandResponse {
    fn from(error: CommandError) -> Self {
        Self::failed(error)
    }
}

impl From<std::result::Result<(), CommandError>> for CommandResponse {
    fn from(result: std::result::Result<(), CommandError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}
