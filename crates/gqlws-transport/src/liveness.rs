//! Liveness monitoring: inbound keep-alive watchdog and outbound pings.
//!
//! Both loops are pure with respect to the transport: they watch a
//! [`Signal`] and report an outcome. The caller decides what a timeout
//! means for the connection.

use std::future::Future;
use std::time::Duration;

use gqlws_core::Result;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Level-triggered, resettable flag that tasks can wait on.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<bool>,
}

impl Signal {
    /// New signal in the given state.
    pub fn new(set: bool) -> Self {
        let (tx, _) = watch::channel(set);
        Self { tx }
    }

    /// Raise the flag, waking waiters.
    pub fn set(&self) {
        let _ = self.tx.send_replace(true);
    }

    /// Lower the flag.
    pub fn clear(&self) {
        let _ = self.tx.send_replace(false);
    }

    /// Current state.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is raised.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Wait up to `limit` for the flag. Returns whether it was raised.
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        time::timeout(limit, self.wait()).await.is_ok()
    }
}

/// Signals maintained by the receive loop for one connection.
#[derive(Debug)]
pub struct LivenessSignals {
    /// Raised by every keep-alive kind message (`ka`, `ping`, `pong`).
    pub keep_alive: Signal,
    /// Raised when the server pings.
    pub ping_received: Signal,
    /// Raised when the server answers a ping.
    pub pong_received: Signal,
}

impl Default for LivenessSignals {
    fn default() -> Self {
        Self {
            keep_alive: Signal::new(true),
            ping_received: Signal::new(false),
            pong_received: Signal::new(false),
        }
    }
}

impl LivenessSignals {
    /// Back to the fresh-connection state.
    pub fn reset(&self) {
        self.keep_alive.set();
        self.ping_received.clear();
        self.pong_received.clear();
    }
}

/// How a liveness loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// The peer stayed silent past the allowed window.
    TimedOut,
    /// The loop was cancelled externally.
    Cancelled,
    /// Sending a ping failed; the send path has already failed the transport.
    SendFailed,
}

/// Watch inbound keep-alives.
///
/// Each round waits up to `limit` for `signal`, then lowers it again so the
/// next round needs a fresh keep-alive.
pub async fn run_keep_alive_watchdog(
    signal: &Signal,
    limit: Duration,
    cancel: CancellationToken,
) -> LivenessOutcome {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return LivenessOutcome::Cancelled,
            alive = signal.wait_timeout(limit) => {
                if !alive {
                    return LivenessOutcome::TimedOut;
                }
                signal.clear();
            }
        }
    }
}

/// Send a ping every `interval` and require a pong within `pong_timeout`.
pub async fn run_ping_sender<F, Fut>(
    interval: Duration,
    pong_timeout: Duration,
    pong: &Signal,
    cancel: CancellationToken,
    mut send_ping: F,
) -> LivenessOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return LivenessOutcome::Cancelled,
            () = time::sleep(interval) => {}
        }
        if send_ping().await.is_err() {
            return LivenessOutcome::SendFailed;
        }
        tokio::select! {
            () = cancel.cancelled() => return LivenessOutcome::Cancelled,
            answered = pong.wait_timeout(pong_timeout) => {
                if !answered {
                    return LivenessOutcome::TimedOut;
                }
                pong.clear();
            }
        }
    }
}
