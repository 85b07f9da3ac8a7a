//! Connection lifecycle.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──upgrade──▶ Initializing ──ack──▶ Ready
//!      ▲                         │                        │                 │
//!      │                         └──────── error ─────────┤               fail
//!      │                                                  ▼                 ▼
//!      └───────────────────────── shutdown ───────────── Closing ◀──────────┘
//! ```
//!
//! The first failure wins: it becomes the sticky close error, moves the
//! connection to `Closing`, and spawns a single shutdown task. Later
//! failures while closing are logged and discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gqlws_core::{Result, TransportError};
use gqlws_settings::TransportSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::liveness::{self, LivenessOutcome, LivenessSignals};
use crate::protocol::{Answer, AnswerKind, ClientMessage, Dialect, parse_answer};
use crate::registry::ListenerRegistry;
use crate::socket::{Connector, Established, FrameSink, FrameStream, SocketEvent};

/// Where the connection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No connection. A fresh `connect()` is required.
    Disconnected,
    /// The websocket upgrade is in progress.
    Connecting,
    /// Upgraded; waiting for `connection_ack`.
    Initializing,
    /// Acknowledged; operations may run.
    Ready,
    /// Shutdown in progress.
    Closing,
}

impl Phase {
    /// Whether a socket is attached.
    pub fn has_connection(self) -> bool {
        matches!(self, Self::Initializing | Self::Ready | Self::Closing)
    }
}

/// A background task paired with its cancellation token.
struct Duty {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Duty {
    fn spawn<F>(cancel: CancellationToken, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            cancel,
            handle: tokio::spawn(task),
        }
    }

    async fn stop(self, name: &'static str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!(duty = name, "background task panicked");
            }
        }
        trace!(duty = name, "background task stopped");
    }
}

#[derive(Default)]
struct Duties {
    receive: Option<Duty>,
    keep_alive: Option<Duty>,
    ping: Option<Duty>,
}

#[derive(Default)]
struct State {
    dialect: Dialect,
    next_operation_id: u64,
    close_error: Option<TransportError>,
    duties: Duties,
}

/// Payloads the server attached to handshake and liveness messages.
#[derive(Default)]
struct Payloads {
    ack: Option<Value>,
    ping: Option<Value>,
    pong: Option<Value>,
}

/// State shared by the transport handle, its subscriptions and its tasks.
///
/// Phase transitions happen only while `state` is locked.
pub(crate) struct Shared {
    settings: TransportSettings,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
    phase: watch::Sender<Phase>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    payloads: Mutex<Payloads>,
    pub(crate) registry: ListenerRegistry,
    pub(crate) liveness: LivenessSignals,
}

impl Shared {
    pub(crate) fn new(settings: TransportSettings, connector: Arc<dyn Connector>) -> Self {
        let (phase, _) = watch::channel(Phase::Disconnected);
        Self {
            settings,
            connector,
            state: Mutex::new(State::default()),
            phase,
            sink: tokio::sync::Mutex::new(None),
            payloads: Mutex::new(Payloads::default()),
            registry: ListenerRegistry::new(),
            liveness: LivenessSignals::default(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub(crate) fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.state.lock().dialect
    }

    pub(crate) fn close_error(&self) -> Option<TransportError> {
        self.state.lock().close_error.clone()
    }

    /// The sticky close error, or a generic "not connected" error.
    pub(crate) fn closed_error(&self) -> TransportError {
        self.close_error()
            .unwrap_or_else(TransportError::not_connected)
    }

    pub(crate) fn ack_payload(&self) -> Option<Value> {
        self.payloads.lock().ack.clone()
    }

    pub(crate) fn last_ping_payload(&self) -> Option<Value> {
        self.payloads.lock().ping.clone()
    }

    pub(crate) fn last_pong_payload(&self) -> Option<Value> {
        self.payloads.lock().pong.clone()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            trace!(from = ?previous, to = ?phase, "phase change");
        }
    }

    // ── Connect ─────────────────────────────────────────────────────────

    /// Open the socket, run the init handshake and start background duties.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let _state = self.state.lock();
            if self.phase() != Phase::Disconnected {
                return Err(TransportError::AlreadyConnected);
            }
            self.set_phase(Phase::Connecting);
        }

        debug!(url = %self.settings.url, "connect: starting");
        let established = bounded(
            self.settings.connect_timeout(),
            self.connector.connect(&self.settings),
            |limit| TransportError::Connect(format!("no connection established within {limit:?}")),
        )
        .await;
        let Established {
            subprotocol,
            sink,
            mut stream,
        } = match established {
            Ok(established) => established,
            Err(err) => {
                warn!(url = %self.settings.url, error = %err, "websocket connection failed");
                let _state = self.state.lock();
                self.set_phase(Phase::Disconnected);
                return Err(err);
            }
        };

        let dialect = Dialect::from_subprotocol(subprotocol.as_deref());
        debug!(%dialect, negotiated = ?subprotocol, "backend subprotocol resolved");

        *self.sink.lock().await = Some(sink);
        *self.payloads.lock() = Payloads::default();
        self.liveness.reset();
        {
            let mut state = self.state.lock();
            state.dialect = dialect;
            state.next_operation_id = 1;
            state.close_error = None;
            self.set_phase(Phase::Initializing);
        }

        if let Err(err) = self.initialize(dialect, stream.as_mut()).await {
            warn!(error = %err, "connection initialization failed");
            self.fail(err.clone(), false);
            self.wait_closed().await;
            return Err(err);
        }

        let mut state = self.state.lock();
        if self.phase() != Phase::Initializing {
            // closed while the handshake was running
            return Err(state
                .close_error
                .clone()
                .unwrap_or_else(TransportError::not_connected));
        }

        let token = CancellationToken::new();
        state.duties.receive = Some(Duty::spawn(
            token.clone(),
            Arc::clone(self).receive_loop(stream, token),
        ));
        if let Some(limit) = self.settings.keep_alive_timeout() {
            let token = CancellationToken::new();
            state.duties.keep_alive = Some(Duty::spawn(
                token.clone(),
                Arc::clone(self).watch_keep_alive(limit, token),
            ));
        }
        if dialect.supports_ping() {
            if let (Some(interval), Some(pong_timeout)) =
                (self.settings.ping_interval(), self.settings.pong_timeout())
            {
                let token = CancellationToken::new();
                state.duties.ping = Some(Duty::spawn(
                    token.clone(),
                    Arc::clone(self).send_pings(interval, pong_timeout, token),
                ));
            }
        }
        self.set_phase(Phase::Ready);
        info!(url = %self.settings.url, %dialect, "connected");
        Ok(())
    }

    /// Send `connection_init` and wait for `connection_ack`.
    async fn initialize(self: &Arc<Self>, dialect: Dialect, stream: &mut dyn FrameStream) -> Result<()> {
        self.send(ClientMessage::init(self.settings.init_payload.clone()))
            .await?;
        bounded(
            self.settings.ack_timeout(),
            self.wait_for_ack(dialect, stream),
            |limit| TransportError::Server(format!("No connection_ack received within {limit:?}")),
        )
        .await?;
        debug!("connection_ack received");
        Ok(())
    }

    /// Read until `connection_ack`, discarding keep-alive kind messages.
    async fn wait_for_ack(&self, dialect: Dialect, stream: &mut dyn FrameStream) -> Result<()> {
        loop {
            let text = match stream.receive().await {
                SocketEvent::Text(text) => text,
                other => return Err(event_error(other)),
            };
            debug!("<<< {text}");
            let answer = parse_answer(dialect, &text).map_err(|err| match err {
                TransportError::Query { .. } => TransportError::Protocol(format!(
                    "unexpected operation error before connection_ack: {err}"
                )),
                other => other,
            })?;
            if answer.kind == AnswerKind::Ack {
                self.payloads.lock().ack = answer.payload;
                return Ok(());
            }
            if !answer.is_keep_alive() {
                return Err(TransportError::Protocol(
                    "Websocket server did not return a connection ack".into(),
                ));
            }
            trace!(kind = ?answer.kind, "ignoring message before ack");
        }
    }

    // ── Send ────────────────────────────────────────────────────────────

    /// Serialize and send one message. All outbound frames go through here.
    ///
    /// A socket failure fails the transport (non-clean) before the error is
    /// returned to the caller.
    pub(crate) async fn send(self: &Arc<Self>, message: ClientMessage) -> Result<()> {
        let text = message.encode()?;
        let mut sink = self.sink.lock().await;
        let Some(socket) = sink.as_mut() else {
            return Err(self.closed_error());
        };
        match socket.send_text(text.clone()).await {
            Ok(()) => {
                debug!(">>> {text}");
                Ok(())
            }
            Err(err) => {
                drop(sink);
                warn!(error = %err, kind = message.kind, "send failed");
                self.fail(err.clone(), false);
                Err(err)
            }
        }
    }

    // ── Receive loop ────────────────────────────────────────────────────

    async fn receive_loop(self: Arc<Self>, mut stream: Box<dyn FrameStream>, cancel: CancellationToken) {
        debug!("receive loop: starting");
        let dialect = self.dialect();
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = stream.receive() => event,
            };
            let text = match event {
                SocketEvent::Text(text) => text,
                other => {
                    let err = event_error(other);
                    info!(error = %err, "connection lost");
                    self.fail(err, false);
                    break;
                }
            };
            debug!("<<< {text}");

            match parse_answer(dialect, &text) {
                Ok(answer) => self.handle_answer(answer),
                Err(err @ TransportError::Query { .. }) => {
                    if let Some(operation_id) = err.operation_id() {
                        if !self.registry.fail(operation_id, err) {
                            trace!(operation_id, "error for unknown operation dropped");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "fatal message from server");
                    self.fail(err, false);
                    break;
                }
            }
        }
        debug!("receive loop: exiting");
    }

    fn handle_answer(self: &Arc<Self>, answer: Answer) {
        if answer.is_keep_alive() {
            self.liveness.keep_alive.set();
        }
        match answer.kind {
            AnswerKind::Ping => {
                self.payloads.lock().ping = answer.payload;
                self.liveness.ping_received.set();
                if self.settings.answer_pings {
                    let shared = Arc::clone(self);
                    let _ = tokio::spawn(async move {
                        if let Err(e) = shared.send(ClientMessage::pong(None)).await {
                            debug!(error = %e, "pong reply failed");
                        }
                    });
                }
            }
            AnswerKind::Pong => {
                self.payloads.lock().pong = answer.payload;
                self.liveness.pong_received.set();
            }
            AnswerKind::Ack | AnswerKind::KeepAlive => {}
            AnswerKind::Data | AnswerKind::Complete => {
                let Some(operation_id) = answer.operation_id else {
                    return;
                };
                if !self.registry.deliver(operation_id, answer.kind, answer.result) {
                    trace!(operation_id, "answer for unknown operation dropped");
                }
            }
        }
    }

    // ── Liveness duties ─────────────────────────────────────────────────

    async fn watch_keep_alive(self: Arc<Self>, limit: Duration, cancel: CancellationToken) {
        match liveness::run_keep_alive_watchdog(&self.liveness.keep_alive, limit, cancel).await {
            LivenessOutcome::TimedOut => {
                warn!(?limit, "no keep-alive received in time");
                self.fail(
                    TransportError::Server(
                        "No keep-alive message has been received within the expected interval \
                         ('keep_alive_timeout' parameter)"
                            .into(),
                    ),
                    false,
                );
            }
            outcome => trace!(?outcome, "keep-alive watchdog exited"),
        }
    }

    async fn send_pings(self: Arc<Self>, interval: Duration, pong_timeout: Duration, cancel: CancellationToken) {
        let sender = Arc::clone(&self);
        let outcome = liveness::run_ping_sender(
            interval,
            pong_timeout,
            &self.liveness.pong_received,
            cancel,
            move || {
                let sender = Arc::clone(&sender);
                async move { sender.send(ClientMessage::ping(None)).await }
            },
        )
        .await;
        match outcome {
            LivenessOutcome::TimedOut => {
                warn!(?pong_timeout, "no pong received in time");
                self.fail(
                    TransportError::Server(format!(
                        "No pong received after {:?} seconds",
                        pong_timeout.as_secs_f64()
                    )),
                    false,
                );
            }
            outcome => trace!(?outcome, "ping sender exited"),
        }
    }

    // ── Failure & shutdown ──────────────────────────────────────────────

    /// Record `error` as the close cause and start shutdown.
    ///
    /// Only the first call per connection has an effect.
    pub(crate) fn fail(self: &Arc<Self>, error: TransportError, clean: bool) {
        let mut state = self.state.lock();
        match self.phase() {
            Phase::Initializing | Phase::Ready => {
                debug!(error = %error, clean, "fail: starting shutdown");
                state.close_error = Some(error.clone());
                self.set_phase(Phase::Closing);
                drop(state);
                let _ = tokio::spawn(Arc::clone(self).shutdown(error, clean));
            }
            Phase::Closing => {
                debug!(error = %error, "close already in progress, discarding failure");
            }
            Phase::Disconnected | Phase::Connecting => {
                debug!(error = %error, "fail: no live connection");
            }
        }
    }

    /// Fail cleanly with the user-close error and wait for shutdown.
    pub(crate) async fn close(self: &Arc<Self>) {
        debug!("close: starting");
        self.fail(TransportError::closed_by_user(), true);
        self.wait_closed().await;
        debug!("close: done");
    }

    /// Resolve once no connection is attached.
    pub(crate) async fn wait_closed(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| !phase.has_connection()).await;
    }

    async fn shutdown(self: Arc<Self>, error: TransportError, clean: bool) {
        debug!("shutdown: starting");
        if clean {
            self.clean_close().await;
        }

        let duties = std::mem::take(&mut self.state.lock().duties);
        if let Some(duty) = duties.keep_alive {
            duty.stop("keep-alive watchdog").await;
        }
        if let Some(duty) = duties.ping {
            duty.stop("ping sender").await;
        }

        self.registry.broadcast_failure(&error);

        debug!("shutdown: closing websocket");
        if let Some(mut socket) = self.sink.lock().await.take() {
            if let Err(e) = socket.close().await {
                debug!(error = %e, "ignoring error while closing websocket");
            }
        }
        if let Some(duty) = duties.receive {
            duty.stop("receive loop").await;
        }

        {
            let _state = self.state.lock();
            self.set_phase(Phase::Disconnected);
        }
        info!(error = %error, "disconnected");
    }

    /// Stop live operations and give them `close_timeout` to finish.
    async fn clean_close(self: &Arc<Self>) {
        let dialect = self.dialect();
        for operation_id in self.registry.take_all_stops() {
            if let Err(e) = self.send(ClientMessage::stop(dialect, operation_id)).await {
                debug!(error = %e, "stop failed, skipping clean close");
                return;
            }
        }

        let idle = self.registry.wait_idle();
        match self.settings.close_timeout() {
            Some(limit) => {
                if time::timeout(limit, idle).await.is_err() {
                    debug!(?limit, remaining = self.registry.len(), "close timeout reached");
                }
            }
            None => idle.await,
        }

        if dialect == Dialect::Apollo {
            if let Err(e) = self.send(ClientMessage::terminate()).await {
                debug!(error = %e, "connection_terminate failed");
            }
        }
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Wait for a usable connection, connecting implicitly when none was
    /// ever made (or the last one failed before being established).
    pub(crate) async fn ensure_ready(self: &Arc<Self>) -> Result<()> {
        let mut rx = self.phase.subscribe();
        loop {
            let phase = *rx.borrow_and_update();
            match phase {
                Phase::Ready => return Ok(()),
                Phase::Closing => return Err(self.closed_error()),
                Phase::Connecting | Phase::Initializing => {
                    if rx.changed().await.is_err() {
                        return Err(self.closed_error());
                    }
                }
                Phase::Disconnected => {
                    if let Some(err) = self.close_error() {
                        return Err(err);
                    }
                    match self.connect().await {
                        Ok(()) | Err(TransportError::AlreadyConnected) => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Reserve the next operation id on the live connection.
    pub(crate) fn next_operation(&self) -> Result<(u64, Dialect)> {
        let mut state = self.state.lock();
        if self.phase() != Phase::Ready {
            return Err(state
                .close_error
                .clone()
                .unwrap_or_else(TransportError::not_connected));
        }
        let operation_id = state.next_operation_id;
        state.next_operation_id += 1;
        Ok((operation_id, state.dialect))
    }
}

/// Run `fut` under an optional time limit.
async fn bounded<T, F, E>(limit: Option<Duration>, fut: F, on_timeout: E) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce(Duration) -> TransportError,
{
    match limit {
        Some(limit) => time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(on_timeout(limit))),
        None => fut.await,
    }
}

fn event_error(event: SocketEvent) -> TransportError {
    match event {
        SocketEvent::Closed { code, reason } => TransportError::ConnectionReset(match code {
            Some(code) => format!("server closed the connection (code {code}): {reason}"),
            None => format!("server closed the connection: {reason}"),
        }),
        SocketEvent::Reset(reason) => TransportError::ConnectionReset(reason),
        SocketEvent::Binary(_) => {
            TransportError::Protocol("binary frames are not part of the protocol".into())
        }
        SocketEvent::Text(text) => TransportError::bad_answer(&text),
    }
}
