//! Inbound message classification.
//!
//! Every text frame from the server is turned into an [`Answer`], an
//! operation-scoped [`TransportError::Query`], or a fatal error. Fatal
//! errors tear down the connection; query errors only end one operation.

use gqlws_core::{ExecutionResult, Result, TransportError};
use serde_json::Value;

use super::Dialect;

/// Kind of a classified server message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerKind {
    /// `connection_ack`.
    Ack,
    /// Apollo `ka` keep-alive.
    KeepAlive,
    /// `ping` from the server.
    Ping,
    /// `pong` answering one of our pings.
    Pong,
    /// `data` / `next`: one execution result.
    Data,
    /// The server finished the operation.
    Complete,
}

/// A server message that is neither an error nor a protocol violation.
#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    /// What the message means.
    pub kind: AnswerKind,
    /// Operation the message belongs to.
    pub operation_id: Option<u64>,
    /// Execution result of a `Data` answer.
    pub result: Option<ExecutionResult>,
    /// Raw payload of `Ack`, `Ping` and `Pong` answers.
    pub payload: Option<Value>,
}

impl Answer {
    fn new(kind: AnswerKind) -> Self {
        Self {
            kind,
            operation_id: None,
            result: None,
            payload: None,
        }
    }

    /// Whether the message counts as a liveness signal.
    pub fn is_keep_alive(&self) -> bool {
        matches!(
            self.kind,
            AnswerKind::KeepAlive | AnswerKind::Ping | AnswerKind::Pong
        )
    }
}

/// Classify one text frame according to `dialect`.
pub fn parse_answer(dialect: Dialect, text: &str) -> Result<Answer> {
    let message: Value =
        serde_json::from_str(text).map_err(|_| TransportError::bad_answer(text))?;
    let Some(kind) = message.get("type").and_then(Value::as_str) else {
        return Err(TransportError::bad_answer(text));
    };
    let payload = message.get("payload");

    match (dialect, kind) {
        (_, "connection_ack") => Ok(Answer {
            payload: payload.cloned(),
            ..Answer::new(AnswerKind::Ack)
        }),
        (Dialect::Apollo, "ka") => Ok(Answer::new(AnswerKind::KeepAlive)),
        (Dialect::GraphqlWs, "ping") => Ok(Answer {
            payload: payload.cloned(),
            ..Answer::new(AnswerKind::Ping)
        }),
        (Dialect::GraphqlWs, "pong") => Ok(Answer {
            payload: payload.cloned(),
            ..Answer::new(AnswerKind::Pong)
        }),
        (Dialect::Apollo, "connection_error") => Err(TransportError::Server(format!(
            "Server error: {}",
            payload.map_or_else(|| "null".to_string(), Value::to_string)
        ))),
        (_, "complete") => Ok(Answer {
            operation_id: Some(required_id(&message, text)?),
            ..Answer::new(AnswerKind::Complete)
        }),
        (_, "error") => Err(query_error(dialect, &message, text)),
        (_, kind) if kind == dialect.data_type() => {
            let operation_id = required_id(&message, text)?;
            let result = execution_result(payload).ok_or_else(|| TransportError::bad_answer(text))?;
            Ok(Answer {
                operation_id: Some(operation_id),
                result: Some(result),
                ..Answer::new(AnswerKind::Data)
            })
        }
        _ => Err(TransportError::bad_answer(text)),
    }
}

/// Operation ids are sent as decimal strings; integers are accepted too.
fn operation_id(message: &Value) -> Option<u64> {
    match message.get("id")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn required_id(message: &Value, text: &str) -> Result<u64> {
    operation_id(message).ok_or_else(|| TransportError::bad_answer(text))
}

/// Fields are taken as sent; only the payload shape is checked.
fn execution_result(payload: Option<&Value>) -> Option<ExecutionResult> {
    let map = payload?.as_object()?;
    if !map.contains_key("data") && !map.contains_key("errors") {
        return None;
    }
    let field = |key: &str| map.get(key).filter(|v| !v.is_null()).cloned();
    Some(ExecutionResult {
        data: field("data"),
        errors: field("errors"),
        extensions: field("extensions"),
    })
}

fn query_error(dialect: Dialect, message: &Value, text: &str) -> TransportError {
    let Some(operation_id) = operation_id(message) else {
        return TransportError::bad_answer(text);
    };
    let payload = message.get("payload");
    let errors = match (dialect, payload) {
        (Dialect::Apollo, Some(obj @ Value::Object(_))) => vec![obj.clone()],
        (Dialect::GraphqlWs, Some(Value::Array(list))) => list.clone(),
        _ => return TransportError::bad_answer(text),
    };
    let message = errors
        .first()
        .map_or_else(|| "Unknown error".to_string(), error_message);
    TransportError::Query {
        operation_id: Some(operation_id),
        message,
        errors,
    }
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_string)
}
