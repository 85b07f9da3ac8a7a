//! Public transport handle and subscription streams.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use gqlws_core::{ExecutionResult, GraphQLRequest, Result, TransportError};
use gqlws_settings::TransportSettings;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::lifecycle::{Phase, Shared};
use crate::protocol::{AnswerKind, ClientMessage, Dialect};
use crate::registry::Listener;
use crate::socket::{Connector, WsConnector};

/// A GraphQL client transport multiplexing operations over one websocket.
///
/// Operations connect implicitly on first use. Once a connection has been
/// established and then lost, further operations fail with the recorded
/// close error until [`GraphqlWsTransport::connect`] is called again.
pub struct GraphqlWsTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GraphqlWsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlWsTransport")
            .field("url", &self.shared.settings().url)
            .field("phase", &self.shared.phase())
            .finish_non_exhaustive()
    }
}

impl GraphqlWsTransport {
    /// Transport over `tokio-tungstenite`.
    pub fn new(settings: TransportSettings) -> Self {
        Self::with_connector(settings, Arc::new(WsConnector))
    }

    /// Transport over a custom socket implementation.
    pub fn with_connector(settings: TransportSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared::new(settings, connector)),
        }
    }

    /// Settings this transport was built with.
    pub fn settings(&self) -> &TransportSettings {
        self.shared.settings()
    }

    /// Open the connection and complete the init handshake.
    ///
    /// Fails with [`TransportError::AlreadyConnected`] unless disconnected.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect().await
    }

    /// Close cleanly: stop live subscriptions, give them `close_timeout` to
    /// complete, then close the socket. Idempotent.
    pub async fn close(&self) {
        self.shared.close().await;
    }

    /// Resolve once no connection is attached.
    pub async fn wait_closed(&self) {
        self.shared.wait_closed().await;
    }

    /// Start `request` and stream its results.
    ///
    /// Dropping the stream before the server completes the operation sends
    /// a stop message.
    pub async fn subscribe(&self, request: impl Into<GraphQLRequest>) -> Result<Subscription> {
        self.subscribe_with(request, true).await
    }

    /// Like [`Self::subscribe`], choosing whether abandoning the stream
    /// sends a stop message.
    pub async fn subscribe_with(
        &self,
        request: impl Into<GraphQLRequest>,
        send_stop: bool,
    ) -> Result<Subscription> {
        let request = request.into();
        self.shared.ensure_ready().await?;
        let (operation_id, dialect) = self.shared.next_operation()?;

        // Register before sending so an immediate answer has somewhere to go.
        let listener = self.shared.registry.register(operation_id, send_stop)?;
        let mut subscription = Subscription {
            shared: Arc::clone(&self.shared),
            listener,
            finished: false,
        };
        // A shutdown may already have drained the registry.
        if self.shared.phase() != Phase::Ready {
            subscription.finish();
            return Err(self.shared.closed_error());
        }
        if let Err(err) = self
            .shared
            .send(ClientMessage::start(dialect, operation_id, &request))
            .await
        {
            subscription.finish();
            return Err(err);
        }
        debug!(operation_id, "operation started");
        Ok(subscription)
    }

    /// Run `request` and return its first result.
    ///
    /// No stop message is sent once the result arrives.
    pub async fn execute(&self, request: impl Into<GraphQLRequest>) -> Result<ExecutionResult> {
        self.execute_cancellable(request, CancellationToken::new())
            .await
    }

    /// Like [`Self::execute`], abandoning the wait when `cancel` fires.
    ///
    /// An abandoned or empty operation yields a query error.
    pub async fn execute_cancellable(
        &self,
        request: impl Into<GraphQLRequest>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let mut subscription = self.subscribe_with(request, false).await?;
        let operation_id = subscription.operation_id();
        let first = tokio::select! {
            () = cancel.cancelled() => None,
            item = subscription.next() => item,
        };
        drop(subscription);
        first.unwrap_or_else(|| Err(TransportError::no_answer(operation_id)))
    }

    /// Send a `ping` (graphql-transport-ws only).
    pub async fn send_ping(&self, payload: Option<Value>) -> Result<()> {
        self.require_ping_support()?;
        self.shared.send(ClientMessage::ping(payload)).await
    }

    /// Send a `pong` (graphql-transport-ws only).
    pub async fn send_pong(&self, payload: Option<Value>) -> Result<()> {
        self.require_ping_support()?;
        self.shared.send(ClientMessage::pong(payload)).await
    }

    fn require_ping_support(&self) -> Result<()> {
        if !self.shared.phase().has_connection() {
            return Err(self.shared.closed_error());
        }
        let dialect = self.shared.dialect();
        if dialect.supports_ping() {
            Ok(())
        } else {
            Err(TransportError::Protocol(format!(
                "ping/pong is not part of the {dialect} protocol"
            )))
        }
    }

    /// Wait until a server `ping` has been seen since the previous call,
    /// then re-arm.
    ///
    /// A ping that arrived before this call satisfies it immediately.
    pub async fn wait_for_ping(&self) {
        self.shared.liveness.ping_received.wait().await;
        self.shared.liveness.ping_received.clear();
    }

    /// Wait until a server `pong` has been seen since the previous call,
    /// then re-arm.
    ///
    /// Shares its signal with the periodic ping sender when
    /// `pingIntervalSecs` is set.
    pub async fn wait_for_pong(&self) {
        self.shared.liveness.pong_received.wait().await;
        self.shared.liveness.pong_received.clear();
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Whether operations can be started right now.
    pub fn is_connected(&self) -> bool {
        self.shared.phase() == Phase::Ready
    }

    /// Dialect of the attached connection.
    pub fn dialect(&self) -> Option<Dialect> {
        self.shared
            .phase()
            .has_connection()
            .then(|| self.shared.dialect())
    }

    /// Cause of the last shutdown, cleared by the next successful upgrade.
    pub fn close_error(&self) -> Option<TransportError> {
        self.shared.close_error()
    }

    /// Payload of the last `connection_ack`.
    pub fn ack_payload(&self) -> Option<Value> {
        self.shared.ack_payload()
    }

    /// Payload of the last server `ping`.
    pub fn last_ping_payload(&self) -> Option<Value> {
        self.shared.last_ping_payload()
    }

    /// Payload of the last server `pong`.
    pub fn last_pong_payload(&self) -> Option<Value> {
        self.shared.last_pong_payload()
    }

    /// Number of operations still registered.
    pub fn active_operations(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Drop for GraphqlWsTransport {
    fn drop(&mut self) {
        if self.shared.phase().has_connection()
            && tokio::runtime::Handle::try_current().is_ok()
        {
            self.shared.fail(
                TransportError::Closed("transport dropped".into()),
                false,
            );
        }
    }
}

/// Results of one operation, in arrival order.
///
/// Ends after the server completes the operation, or after yielding one
/// error. Dropping it early deregisters the operation and, for
/// subscriptions, sends a stop message.
#[must_use = "streams do nothing unless polled"]
pub struct Subscription {
    shared: Arc<Shared>,
    listener: Listener,
    finished: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("operation_id", &self.operation_id())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Operation id on the wire.
    pub fn operation_id(&self) -> u64 {
        self.listener.operation_id()
    }

    /// Stop the operation now, waiting for the stop message to be sent.
    pub async fn stop(mut self) -> Result<()> {
        let operation_id = self.operation_id();
        let owed = !self.finished && self.shared.registry.take_stop(operation_id);
        self.finish();
        if owed {
            let dialect = self.shared.dialect();
            self.shared
                .send(ClientMessage::stop(dialect, operation_id))
                .await?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.shared.registry.remove(self.operation_id());
    }
}

impl Stream for Subscription {
    type Item = Result<ExecutionResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            match ready!(this.listener.poll_recv(cx)) {
                Some(Ok((_, Some(result)))) => return Poll::Ready(Some(Ok(result))),
                Some(Ok((AnswerKind::Complete, None))) => {
                    trace!(operation_id = this.operation_id(), "complete received");
                    this.finish();
                    return Poll::Ready(None);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    this.finish();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finish();
                    return Poll::Ready(Some(Err(this.shared.closed_error())));
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let operation_id = self.operation_id();
        if !self.finished && self.shared.registry.take_stop(operation_id) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let shared = Arc::clone(&self.shared);
                let _ = runtime.spawn(async move {
                    let dialect = shared.dialect();
                    if let Err(e) = shared.send(ClientMessage::stop(dialect, operation_id)).await {
                        debug!(operation_id, error = %e, "stop after cancellation failed");
                    }
                });
            }
        }
        self.shared.registry.remove(operation_id);
    }
}
