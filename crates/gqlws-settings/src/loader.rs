//! Layered settings for the transport.
//!
//! Compiled defaults, then the JSON settings file, then `GQLWS_*`
//! variables. The file only needs the keys it changes: nested objects such
//! as `initPayload` or `headers` are overlaid key by key, a `null` leaves
//! the lower layer untouched, and any other value (including a
//! `subprotocols` list) replaces it whole.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TransportSettings;

/// `~/.gqlws/settings.json`, or the same name under the temp dir when
/// `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".gqlws")
        .join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<TransportSettings> {
    load_settings_from_path(&settings_path())
}

/// Build validated settings from defaults, `path` and the environment.
///
/// A missing file is not an error. Unreadable files, malformed JSON and
/// values rejected by [`TransportSettings::validate`] are.
pub fn load_settings_from_path(path: &Path) -> Result<TransportSettings> {
    let mut layered = serde_json::to_value(TransportSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), "applying settings file");
            layered = deep_merge(layered, serde_json::from_str(&content)?);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: TransportSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Overlay `source` on `target`.
///
/// Objects combine per key, `null` in `source` keeps what `target` had,
/// everything else in `source` wins.
pub fn deep_merge(target: Value, source: Value) -> Value {
    let Value::Object(layer) = source else {
        return source;
    };
    let Value::Object(mut base) = target else {
        return Value::Object(layer.into_iter().filter(|(_, v)| !v.is_null()).collect());
    };
    for (key, value) in layer.into_iter().filter(|(_, v)| !v.is_null()) {
        let merged = match base.remove(&key) {
            Some(below) => deep_merge(below, value),
            None => value,
        };
        let _ = base.insert(key, merged);
    }
    Value::Object(base)
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut TransportSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides_from<F>(settings: &mut TransportSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let seconds = |key: &str| {
        let val = string(key)?;
        let parsed = parse_seconds(&val);
        if parsed.is_none() {
            warn!(key, value = %val, "invalid seconds env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("GQLWS_URL") {
        settings.url = v;
    }
    if let Some(v) = string("GQLWS_SUBPROTOCOLS") {
        let list: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if !list.is_empty() {
            settings.subprotocols = list;
        }
    }
    if let Some(v) = seconds("GQLWS_CONNECT_TIMEOUT") {
        settings.connect_timeout_secs = Some(v);
    }
    if let Some(v) = seconds("GQLWS_CLOSE_TIMEOUT") {
        settings.close_timeout_secs = Some(v);
    }
    if let Some(v) = seconds("GQLWS_ACK_TIMEOUT") {
        settings.ack_timeout_secs = Some(v);
    }
    if let Some(v) = seconds("GQLWS_KEEP_ALIVE_TIMEOUT") {
        settings.keep_alive_timeout_secs = Some(v);
    }
    if let Some(v) = seconds("GQLWS_PING_INTERVAL") {
        settings.ping_interval_secs = Some(v);
    }
    if let Some(v) = seconds("GQLWS_PONG_TIMEOUT") {
        settings.pong_timeout_secs = Some(v);
    }
    if let Some(val) = string("GQLWS_ANSWER_PINGS") {
        match parse_bool(&val) {
            Some(v) => settings.answer_pings = v,
            None => warn!(key = "GQLWS_ANSWER_PINGS", value = %val, "invalid boolean env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number of seconds that fits in a [`Duration`].
pub fn parse_seconds(val: &str) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    Duration::try_from_secs_f64(n).is_ok().then_some(n)
}
