//! Error types for batch execution and device operations.
//!
//! Two layers of errors exist. [`BatchError`] is returned to the caller when the
//! runner itself is misused or a recording cannot be encoded/decoded.
//! [`OperationError`] is what an executor raises for a single work item; the
//! runner never propagates it, it is classified into a [`FailureKind`] and
//! stored in the item's result.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to the caller of the batch runner.
#[derive(Error, Debug)]
pub enum BatchError {
    /// `max_concurrency` must admit at least one item.
    #[error("invalid max concurrency {0}, must be at least 1")]
    InvalidConcurrency(usize),

    /// A per-item timeout of zero would fail every item before it starts.
    #[error("per-item timeout must be greater than zero")]
    InvalidTimeout,

    /// The recorder's entry buffer is poisoned.
    #[error("record lock error: {0}")]
    RecordLockError(String),

    /// A recorded entry could not be serialized.
    #[error("record encode error: {0}")]
    RecordEncodeError(String),

    /// A JSONL line could not be parsed as a recorded entry.
    #[error("record decode error: {0}")]
    RecordDecodeError(String),

    /// An SSH security level name that is not `secure`, `balanced` or `legacy`.
    #[error("unknown security level '{0}'")]
    InvalidSecurityLevel(String),

    /// The device inventory is malformed.
    #[error("inventory error: {0}")]
    InventoryError(String),
}

/// Classification of a failed work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The target could not be reached or the session dropped.
    Connection,
    /// Credentials were rejected.
    Authentication,
    /// The device rejected a command or returned an error marker.
    Command,
    /// The operation exceeded its time budget.
    Timeout,
    /// The batch was cancelled before the item was dispatched.
    Cancelled,
    /// The operation panicked.
    Panicked,
    /// Anything else raised by the operation.
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connection => "connection",
            FailureKind::Authentication => "authentication",
            FailureKind::Command => "command",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Panicked => "panicked",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by an executor while performing one work item.
#[derive(Error, Debug)]
pub enum OperationError {
    /// The TCP/SSH handshake did not finish in time.
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    /// The device refused the supplied credentials.
    #[error("authentication failed for {0}")]
    AuthenticationFailed(String),

    /// The SSH channel closed while waiting for a prompt.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// A command did not return to the prompt in time.
    ///
    /// Carries the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    CommandTimeout(String),

    /// The device answered with an error marker.
    #[error("command '{command}' rejected: {output}")]
    CommandRejected { command: String, output: String },

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// A replay fixture has no entry for the requested item.
    #[error("replay mismatch: {0}")]
    ReplayMismatch(String),

    /// A failure read back from a recording.
    #[error("{message}")]
    Replayed { kind: FailureKind, message: String },

    /// Free-form failure raised by caller-supplied executors.
    #[error("{0}")]
    Other(String),
}

impl OperationError {
    /// Maps the error onto the classification stored in the batch report.
    pub fn kind(&self) -> FailureKind {
        match self {
            OperationError::ConnectTimeout(_) | OperationError::ChannelDisconnectError => {
                FailureKind::Connection
            }
            OperationError::AuthenticationFailed(_) => FailureKind::Authentication,
            OperationError::CommandTimeout(_) => FailureKind::Timeout,
            OperationError::CommandRejected { .. } => FailureKind::Command,
            OperationError::Ssh2Error(async_ssh2_tokio::Error::PasswordWrong) => {
                FailureKind::Authentication
            }
            OperationError::Ssh2Error(_) | OperationError::RusshError(_) => FailureKind::Connection,
            OperationError::Replayed { kind, .. } => *kind,
            OperationError::ReplayMismatch(_) | OperationError::Other(_) => FailureKind::Other,
        }
    }
}

impl From<String> for OperationError {
    fn from(value: String) -> Self {
        OperationError::Other(value)
    }
}

impl From<&str> for OperationError {
    fn from(value: &str) -> Self {
        OperationError::Other(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_timeout_is_classified_as_timeout() {
        let err = OperationError::CommandTimeout("partial".to_string());
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn replayed_failure_keeps_recorded_kind() {
        let err = OperationError::Replayed {
            kind: FailureKind::Authentication,
            message: "bad password".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Authentication);
        assert_eq!(err.to_string(), "bad password");
    }

    #[test]
    fn free_form_errors_convert_from_strings() {
        let err: OperationError = "boom".into();
        assert_eq!(err.kind(), FailureKind::Other);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::Panicked).expect("encode kind");
        assert_eq!(json, "\"panicked\"");
    }
}
