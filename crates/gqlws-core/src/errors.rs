//! Transport error taxonomy.
//!
//! Errors fall into two groups:
//!
//! - **Operation-scoped**: [`TransportError::Query`] is delivered only to the
//!   listener of the offending operation; the connection stays usable.
//! - **Transport-fatal**: everything else tears the connection down and is
//!   broadcast to every live listener.
//!
//! The type is `Clone` because a single failure is fanned out to many
//! listeners and retained as the sticky close error.

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the transport.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// Malformed or unrecognized wire message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An operation failed on the server; the transport remains usable.
    #[error("{message}")]
    Query {
        /// Operation the error belongs to, when known.
        operation_id: Option<u64>,
        /// Human-readable message (first error of the payload).
        message: String,
        /// Raw error objects as received.
        errors: Vec<Value>,
    },

    /// Peer-reported fatal condition or a liveness/ack timeout.
    #[error("server error: {0}")]
    Server(String),

    /// The transport is not connected or was closed by the user.
    #[error("transport closed: {0}")]
    Closed(String),

    /// `connect()` was called while a connection exists or is being made.
    #[error("transport is already connected")]
    AlreadyConnected,

    /// The socket dropped underneath the transport.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Socket establishment failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

impl TransportError {
    /// Build a protocol error for an unparseable server answer.
    #[must_use]
    pub fn bad_answer(answer: &str) -> Self {
        Self::Protocol(format!("Server did not return a GraphQL result: {answer}"))
    }

    /// The error recorded when the user closes the transport.
    #[must_use]
    pub fn closed_by_user() -> Self {
        Self::Closed("Websocket GraphQL transport closed by user".into())
    }

    /// The error returned when the transport has no live connection.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::Closed("WebSocket connection is closed".into())
    }

    /// An operation that finished without yielding a single result.
    #[must_use]
    pub fn no_answer(operation_id: u64) -> Self {
        Self::Query {
            operation_id: Some(operation_id),
            message: "Query completed without any answer received from the server".into(),
            errors: Vec::new(),
        }
    }

    /// Whether this error tears down the whole connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Query { .. } | Self::AlreadyConnected)
    }

    /// Operation id carried by a query error.
    pub fn operation_id(&self) -> Option<u64> {
        match self {
            Self::Query { operation_id, .. } => *operation_id,
            _ => None,
        }
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
