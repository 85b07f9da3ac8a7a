//! Per-operation listener registry.
//!
//! Maps each in-flight operation id to an unbounded queue. The receive loop
//! pushes answers in arrival order; the consumer drains them through its
//! [`Listener`]. An operation leaves the registry when it completes, fails,
//! or its consumer goes away. [`ListenerRegistry::wait_idle`] lets the
//! clean-close path wait until no operation is left.

use std::collections::HashMap;
use std::task::{Context, Poll};

use gqlws_core::{ExecutionResult, Result, TransportError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::protocol::AnswerKind;

/// One item in an operation's queue: an answer, or the terminal error.
pub type Delivery = Result<(AnswerKind, Option<ExecutionResult>)>;

struct Entry {
    send_stop: bool,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Receiving end of one operation's queue.
#[derive(Debug)]
pub struct Listener {
    operation_id: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Listener {
    /// Operation this listener belongs to.
    pub fn operation_id(&self) -> u64 {
        self.operation_id
    }

    /// Next queued item; `None` once the entry is gone and the queue drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Poll form of [`Self::recv`].
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        self.rx.poll_recv(cx)
    }
}

/// Thread-safe map of operation id to listener queue.
pub struct ListenerRegistry {
    entries: Mutex<HashMap<u64, Entry>>,
    idle: watch::Sender<bool>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            entries: Mutex::new(HashMap::new()),
            idle,
        }
    }

    /// Register operation `operation_id`.
    ///
    /// `send_stop` records whether a stop message is owed to the server if
    /// the consumer leaves before the operation completes.
    pub fn register(&self, operation_id: u64, send_stop: bool) -> Result<Listener> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&operation_id) {
            return Err(TransportError::Protocol(format!(
                "operation id {operation_id} is already in use"
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = entries.insert(operation_id, Entry { send_stop, tx });
        let _ = self.idle.send_replace(false);
        trace!(operation_id, send_stop, "listener registered");
        Ok(Listener { operation_id, rx })
    }

    /// Route an answer to its listener.
    ///
    /// A `Complete` answer is the last one: the entry is dropped so no later
    /// answer for the id is delivered. Returns `false` when no listener
    /// exists for the id.
    pub fn deliver(
        &self,
        operation_id: u64,
        kind: AnswerKind,
        result: Option<ExecutionResult>,
    ) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(&operation_id) else {
            return false;
        };
        let _ = entry.tx.send(Ok((kind, result)));
        if kind == AnswerKind::Complete {
            let _ = entries.remove(&operation_id);
            self.signal_if_idle(&entries);
        }
        true
    }

    /// End one operation with `error`.
    pub fn fail(&self, operation_id: u64, error: TransportError) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.remove(&operation_id) else {
            return false;
        };
        debug!(operation_id, error = %error, "operation failed");
        let _ = entry.tx.send(Err(error));
        self.signal_if_idle(&entries);
        true
    }

    /// Drop operation `operation_id`. Idempotent.
    pub fn remove(&self, operation_id: u64) {
        let mut entries = self.entries.lock();
        if entries.remove(&operation_id).is_some() {
            trace!(operation_id, "listener removed");
            self.signal_if_idle(&entries);
        }
    }

    /// Deliver `error` to every listener and empty the registry.
    pub fn broadcast_failure(&self, error: &TransportError) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!(listeners = entries.len(), error = %error, "broadcasting failure");
        }
        for (_, entry) in entries.drain() {
            let _ = entry.tx.send(Err(error.clone()));
        }
        let _ = self.idle.send_replace(true);
    }

    /// Claim the stop message owed for `operation_id`.
    ///
    /// Returns `true` at most once per operation, and only while the
    /// operation is registered with `send_stop`.
    pub fn take_stop(&self, operation_id: u64) -> bool {
        self.entries
            .lock()
            .get_mut(&operation_id)
            .is_some_and(|entry| std::mem::replace(&mut entry.send_stop, false))
    }

    /// Claim every owed stop message, in ascending id order.
    pub fn take_all_stops(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .entries
            .lock()
            .iter_mut()
            .filter_map(|(id, entry)| std::mem::replace(&mut entry.send_stop, false).then_some(*id))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no operation is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Resolve once the registry is empty.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    fn signal_if_idle(&self, entries: &HashMap<u64, Entry>) {
        if entries.is_empty() {
            let _ = self.idle.send_replace(true);
        }
    }
}
