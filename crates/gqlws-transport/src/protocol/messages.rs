//! Outbound client messages.

use gqlws_core::{GraphQLRequest, Result, TransportError};
use serde::Serialize;
use serde_json::Value;

use super::Dialect;

/// A message sent by the client, serialized as one text frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClientMessage {
    /// Wire `type` field.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Operation id as a decimal string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ClientMessage {
    fn bare(kind: &'static str) -> Self {
        Self {
            kind,
            id: None,
            payload: None,
        }
    }

    /// `connection_init` with the configured payload.
    pub fn init(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::bare("connection_init")
        }
    }

    /// Start `request` as operation `operation_id`.
    pub fn start(dialect: Dialect, operation_id: u64, request: &GraphQLRequest) -> Self {
        Self {
            id: Some(operation_id.to_string()),
            payload: Some(request.to_payload()),
            ..Self::bare(dialect.start_type())
        }
    }

    /// Ask the server to stop operation `operation_id`.
    pub fn stop(dialect: Dialect, operation_id: u64) -> Self {
        Self {
            id: Some(operation_id.to_string()),
            ..Self::bare(dialect.stop_type())
        }
    }

    /// `ping`, optionally with a payload.
    pub fn ping(payload: Option<Value>) -> Self {
        Self {
            payload,
            ..Self::bare("ping")
        }
    }

    /// `pong`, optionally with a payload.
    pub fn pong(payload: Option<Value>) -> Self {
        Self {
            payload,
            ..Self::bare("pong")
        }
    }

    /// Apollo `connection_terminate`.
    pub fn terminate() -> Self {
        Self::bare("connection_terminate")
    }

    /// Serialize to the text frame body.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| TransportError::Protocol(format!("failed to encode {}: {e}", self.kind)))
    }
}
