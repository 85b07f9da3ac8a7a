//! Transport settings.
//!
//! Only the timeouts, the init payload, the subprotocol list and
//! `answer_pings` are interpreted by the transport itself. Everything else
//! is handed verbatim to the socket layer.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SettingsError};

/// Subprotocol identifier of the legacy Apollo dialect.
pub const APOLLO_SUBPROTOCOL: &str = "graphql-ws";
/// Subprotocol identifier of the current graphql-ws dialect.
pub const GRAPHQLWS_SUBPROTOCOL: &str = "graphql-transport-ws";

/// Configuration for one websocket transport.
///
/// Timeouts are seconds; `None` or `0` leaves the wait unbounded (or the
/// watchdog disabled).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Server endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Subprotocols offered during the upgrade; the server picks one.
    pub subprotocols: Vec<String>,
    /// Extra upgrade request headers.
    pub headers: BTreeMap<String, String>,
    /// Bound on socket establishment.
    pub connect_timeout_secs: Option<f64>,
    /// Bound on waiting for in-flight operations during a clean close.
    pub close_timeout_secs: Option<f64>,
    /// Bound on waiting for `connection_ack`.
    pub ack_timeout_secs: Option<f64>,
    /// Fail the connection if no keep-alive arrives within this window.
    pub keep_alive_timeout_secs: Option<f64>,
    /// Send a `ping` this often (graphql-transport-ws only).
    pub ping_interval_secs: Option<f64>,
    /// Bound on waiting for the `pong`; defaults to half the ping interval.
    pub pong_timeout_secs: Option<f64>,
    /// Payload of the `connection_init` message.
    pub init_payload: Value,
    /// Reply to server pings automatically.
    pub answer_pings: bool,
    /// Largest accepted incoming message in bytes.
    pub max_message_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000/graphql".to_string(),
            subprotocols: vec![
                APOLLO_SUBPROTOCOL.to_string(),
                GRAPHQLWS_SUBPROTOCOL.to_string(),
            ],
            headers: BTreeMap::new(),
            connect_timeout_secs: Some(10.0),
            close_timeout_secs: Some(10.0),
            ack_timeout_secs: Some(10.0),
            keep_alive_timeout_secs: None,
            ping_interval_secs: None,
            pong_timeout_secs: None,
            init_payload: Value::Object(serde_json::Map::new()),
            answer_pings: true,
            max_message_size: 4 * 1024 * 1024, // 4 MB
        }
    }
}

impl TransportSettings {
    /// Settings for `url` with every other value at its default.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Bound on socket establishment.
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs(self.connect_timeout_secs)
    }

    /// Bound on the clean-close wait.
    pub fn close_timeout(&self) -> Option<Duration> {
        secs(self.close_timeout_secs)
    }

    /// Bound on the `connection_ack` wait.
    pub fn ack_timeout(&self) -> Option<Duration> {
        secs(self.ack_timeout_secs)
    }

    /// Inbound keep-alive window, if the watchdog is enabled.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        secs(self.keep_alive_timeout_secs)
    }

    /// Outbound ping period, if pings are enabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        secs(self.ping_interval_secs)
    }

    /// Pong wait bound. Only meaningful when [`Self::ping_interval`] is set.
    pub fn pong_timeout(&self) -> Option<Duration> {
        let interval = self.ping_interval()?;
        secs(self.pong_timeout_secs).or(Some(interval / 2))
    }

    /// Check for values the transport cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("url must not be empty".into()));
        }
        if self.subprotocols.is_empty() {
            return Err(SettingsError::InvalidValue(
                "subprotocols must list at least one dialect".into(),
            ));
        }
        let timeouts = [
            ("connectTimeoutSecs", self.connect_timeout_secs),
            ("closeTimeoutSecs", self.close_timeout_secs),
            ("ackTimeoutSecs", self.ack_timeout_secs),
            ("keepAliveTimeoutSecs", self.keep_alive_timeout_secs),
            ("pingIntervalSecs", self.ping_interval_secs),
            ("pongTimeoutSecs", self.pong_timeout_secs),
        ];
        for (name, value) in timeouts {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(SettingsError::InvalidValue(format!(
                        "{name} must be a finite number >= 0, got {v}"
                    )));
                }
                if Duration::try_from_secs_f64(v).is_err() {
                    return Err(SettingsError::InvalidValue(format!(
                        "{name} is too large, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn secs(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|v| *v > 0.0)
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
}
