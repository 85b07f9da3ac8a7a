//! # gqlws-transport
//!
//! GraphQL client transport over a single websocket, speaking both the
//! legacy Apollo protocol (`graphql-ws`) and the `graphql-transport-ws`
//! protocol. Many operations share one connection; each is identified by a
//! monotonically increasing operation id.
//!
//! - [`protocol`]: dialects, inbound classification, outbound messages
//! - [`registry`]: per-operation answer queues
//! - [`liveness`]: keep-alive watchdog and ping/pong
//! - [`socket`]: the websocket seam and its `tokio-tungstenite` connector
//! - [`lifecycle`]: connect, receive loop, clean and non-clean shutdown
//! - [`client`]: [`GraphqlWsTransport`] and [`Subscription`]

#![deny(unsafe_code)]

pub mod client;
pub mod lifecycle;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod socket;

pub use client::{GraphqlWsTransport, Subscription};
pub use gqlws_core::{ExecutionResult, GraphQLRequest, Result, TransportError};
pub use gqlws_settings::TransportSettings;
pub use lifecycle::Phase;
pub use protocol::Dialect;
pub use socket::{Connector, Established, FrameSink, FrameStream, SocketEvent, WsConnector};
