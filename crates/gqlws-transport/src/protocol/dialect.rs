//! The two wire dialects and the message types that differ between them.

use std::fmt;

use gqlws_settings::{APOLLO_SUBPROTOCOL, GRAPHQLWS_SUBPROTOCOL};

/// Sub-protocol spoken on the connection, resolved after the upgrade.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Legacy Apollo `subscriptions-transport-ws` protocol (`graphql-ws`).
    #[default]
    Apollo,
    /// The `graphql-ws` library protocol (`graphql-transport-ws`).
    GraphqlWs,
}

impl Dialect {
    /// Resolve the dialect from the negotiated subprotocol.
    ///
    /// Falls back to [`Dialect::Apollo`] when the server did not pick one.
    pub fn from_subprotocol(subprotocol: Option<&str>) -> Self {
        match subprotocol.map(str::trim) {
            Some(GRAPHQLWS_SUBPROTOCOL) => Self::GraphqlWs,
            _ => Self::Apollo,
        }
    }

    /// Subprotocol identifier sent during the upgrade.
    pub fn subprotocol(self) -> &'static str {
        match self {
            Self::Apollo => APOLLO_SUBPROTOCOL,
            Self::GraphqlWs => GRAPHQLWS_SUBPROTOCOL,
        }
    }

    /// Message type that starts an operation.
    pub fn start_type(self) -> &'static str {
        match self {
            Self::Apollo => "start",
            Self::GraphqlWs => "subscribe",
        }
    }

    /// Message type the client sends to end an operation early.
    pub fn stop_type(self) -> &'static str {
        match self {
            Self::Apollo => "stop",
            Self::GraphqlWs => "complete",
        }
    }

    /// Message type carrying an execution result.
    pub fn data_type(self) -> &'static str {
        match self {
            Self::Apollo => "data",
            Self::GraphqlWs => "next",
        }
    }

    /// Whether the dialect has bidirectional ping/pong.
    pub fn supports_ping(self) -> bool {
        matches!(self, Self::GraphqlWs)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subprotocol())
    }
}
