use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error object returned by the remote peer in place of a result.
///
/// The core does not interpret `code` or `data`; they are carried through
/// to the caller awaiting the matching operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    // ---
    /// Application-defined error code.
    #[serde(default)]
    pub code: i64,

    /// Human-readable description.
    pub message: String,

    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    /// Create a remote error with no structured details.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        // ---
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Errors produced by the correlation and connection layers.
///
/// Errors that belong to one operation are only ever surfaced through that
/// operation's own completion. Connection-level failures are additionally
/// broadcast as part of a [`ConnectionEvent`](crate::ConnectionEvent), which
/// is why the type is cheaply cloneable.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// The frame could not be handed to the transport, typically because the
    /// connection is not open.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller cancelled the operation before a response arrived.
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    /// The connection went down while the operation was still pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A malformed or unmatched frame was received.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered the request with an error object.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The caller-side timeout helper expired before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// A lifecycle operation was invoked in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl RpcError {
    /// Build a cancellation error carrying the caller's reason.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        // ---
        RpcError::Cancelled {
            reason: reason.into(),
        }
    }

    /// True if this error was produced by [`cancel`](crate::Operation::cancel).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled { .. })
    }

    /// True if this error was produced by a connection teardown.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, RpcError::ConnectionLost(_))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization(Arc::new(err))
    }
}

/// Result type alias for correlation and connection operations.
pub type Result<T> = std::result::Result<T, RpcError>;
