//! [`Connector`] backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use gqlws_core::{Result, TransportError};
use gqlws_settings::TransportSettings;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, trace};

use super::{Connector, Established, FrameSink, FrameStream, SocketEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects with `tokio-tungstenite`, applying the configured headers,
/// subprotocols and message size limit.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, settings: &TransportSettings) -> Result<Established> {
        let mut request = settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid url {}: {e}", settings.url)))?;

        let headers = request.headers_mut();
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Connect(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connect(format!("invalid header value for {name}: {e}")))?;
            let _ = headers.insert(name, value);
        }
        if !settings.subprotocols.is_empty() {
            let offered = HeaderValue::from_str(&settings.subprotocols.join(", "))
                .map_err(|e| TransportError::Connect(format!("invalid subprotocol list: {e}")))?;
            let _ = headers.insert(SEC_WEBSOCKET_PROTOCOL, offered);
        }

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(settings.max_message_size);
        config.max_frame_size = Some(settings.max_message_size);

        debug!(url = %settings.url, subprotocols = ?settings.subprotocols, "opening websocket");
        let (ws, response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(|e| TransportError::Connect(format!("WebSocket connect: {e}")))?;

        let subprotocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let (sink, stream) = ws.split();
        Ok(Established {
            subprotocol,
            sink: Box::new(WsSink { sink }),
            stream: Box::new(WsFrames { stream }),
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::ConnectionReset(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::ConnectionReset(e.to_string()))
    }
}

struct WsFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn receive(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => return SocketEvent::Binary(data.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => SocketEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => SocketEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    };
                }
                // Control frames are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    trace!("skipping control frame");
                }
                Some(Err(e)) => return SocketEvent::Reset(e.to_string()),
                None => return SocketEvent::Reset("websocket stream ended".into()),
            }
        }
    }
}
