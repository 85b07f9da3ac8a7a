//! Channel-backed connector and scripted server for transport tests.

#![allow(dead_code, unused_results)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gqlws_transport::{
    Connector, Established, FrameSink, FrameStream, GraphqlWsTransport, Result, SocketEvent,
    TransportError, TransportSettings,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const GRAPHQL_WS: &str = "graphql-transport-ws";
pub const APOLLO: &str = "graphql-ws";

/// What the client wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Text(String),
    Close,
}

/// Connector handing each new connection to a [`MockAcceptor`].
pub struct MockConnector {
    subprotocol: Option<String>,
    delay: Option<Duration>,
    refuse: bool,
    accepted: mpsc::UnboundedSender<MockServer>,
    connects: Mutex<usize>,
}

impl MockConnector {
    pub fn connect_count(&self) -> usize {
        *self.connects.lock()
    }
}

pub struct MockAcceptor {
    rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockAcceptor {
    pub async fn accept(&mut self) -> MockServer {
        tokio::time::timeout(Duration::from_secs(30), self.rx.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }
}

pub fn mock(subprotocol: Option<&str>) -> (Arc<MockConnector>, MockAcceptor) {
    build(subprotocol, None, false)
}

pub fn slow_mock(subprotocol: Option<&str>, delay: Duration) -> (Arc<MockConnector>, MockAcceptor) {
    build(subprotocol, Some(delay), false)
}

pub fn refusing_mock() -> (Arc<MockConnector>, MockAcceptor) {
    build(None, None, true)
}

fn build(
    subprotocol: Option<&str>,
    delay: Option<Duration>,
    refuse: bool,
) -> (Arc<MockConnector>, MockAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = MockConnector {
        subprotocol: subprotocol.map(str::to_owned),
        delay,
        refuse,
        accepted: tx,
        connects: Mutex::new(0),
    };
    (Arc::new(connector), MockAcceptor { rx })
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _settings: &TransportSettings) -> Result<Established> {
        *self.connects.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.refuse {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(MockServer {
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::Connect("acceptor gone".into()))?;
        Ok(Established {
            subprotocol: self.subprotocol.clone(),
            sink: Box::new(MockSink { tx: to_server }),
            stream: Box::new(MockStream { rx: from_server }),
        })
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.tx
            .send(ClientFrame::Text(text))
            .map_err(|_| TransportError::ConnectionReset("server went away".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx
            .send(ClientFrame::Close)
            .map_err(|_| TransportError::ConnectionReset("server went away".into()))
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn receive(&mut self) -> SocketEvent {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| SocketEvent::Reset("server dropped".into()))
    }
}

/// Server end of one mock connection.
pub struct MockServer {
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl MockServer {
    pub fn send(&self, message: Value) {
        let _ = self.to_client.send(SocketEvent::Text(message.to_string()));
    }

    pub fn send_raw(&self, event: SocketEvent) {
        let _ = self.to_client.send(event);
    }

    /// Next frame from the client.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        tokio::time::timeout(Duration::from_secs(30), self.from_client.recv())
            .await
            .expect("client sent nothing")
    }

    /// Next text frame from the client, parsed.
    pub async fn recv(&mut self) -> Value {
        match self.next_frame().await {
            Some(ClientFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub async fn expect_close(&mut self) {
        loop {
            match self.next_frame().await {
                Some(ClientFrame::Close) | None => return,
                Some(ClientFrame::Text(_)) => {}
            }
        }
    }

    /// Whether the client has written nothing further.
    pub fn is_quiet(&mut self) -> bool {
        self.from_client.try_recv().is_err()
    }

    /// Answer `connection_init` with an ack.
    pub async fn handshake(&mut self) -> Value {
        let init = self.recv().await;
        assert_eq!(init["type"], "connection_init");
        self.send(json!({"type": "connection_ack"}));
        init
    }
}

pub fn settings() -> TransportSettings {
    TransportSettings {
        url: "ws://mock/graphql".into(),
        ..TransportSettings::default()
    }
}

/// A connected transport and the server end of its connection.
pub async fn connected(
    subprotocol: Option<&str>,
    settings: TransportSettings,
) -> (GraphqlWsTransport, MockServer, MockAcceptor) {
    let (connector, mut acceptor) = mock(subprotocol);
    let transport = GraphqlWsTransport::with_connector(settings, connector);
    let (result, server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let _ = server.handshake().await;
        server
    });
    result.unwrap();
    (transport, server, acceptor)
}
