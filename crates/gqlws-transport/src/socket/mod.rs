//! Socket seam between the transport and the websocket library.
//!
//! The transport only needs text frames in both directions plus a way to
//! learn that the peer went away. [`WsConnector`] provides that over
//! `tokio-tungstenite`; tests plug in channel-backed connectors.

mod websocket;

use async_trait::async_trait;
use gqlws_core::Result;
use gqlws_settings::TransportSettings;

pub use websocket::WsConnector;

/// What the read half produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// A binary frame. Never valid for either dialect.
    Binary(Vec<u8>),
    /// The peer sent a close frame.
    Closed {
        /// Close code, when the frame carried one.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },
    /// The connection dropped without a close frame.
    Reset(String),
}

/// Write half of an established connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Send a close frame and release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an established connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame. Must be cancel-safe.
    async fn receive(&mut self) -> SocketEvent;
}

/// A freshly upgraded connection.
pub struct Established {
    /// Subprotocol selected by the server, if any.
    pub subprotocol: Option<String>,
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("subprotocol", &self.subprotocol)
            .finish_non_exhaustive()
    }
}

/// Opens websocket connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `settings.url`, offering `settings.subprotocols`.
    async fn connect(&self, settings: &TransportSettings) -> Result<Established>;
}
