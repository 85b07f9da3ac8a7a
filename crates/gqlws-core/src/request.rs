//! Outgoing operation payloads and incoming execution results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of one GraphQL execution, as carried by a `data`/`next` message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Result data, `None` when absent or `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Execution errors reported alongside (or instead of) data, as sent.
    ///
    /// Normally a list of error objects; other shapes are passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    /// Server-specific extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// A rendered GraphQL operation: query text plus optional variables and
/// operation name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphQLRequest {
    /// Printed document.
    pub query: String,
    /// Variable values.
    pub variables: Map<String, Value>,
    /// Operation to run when the document holds several.
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    /// Create a request for the given document text.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Attach variable values. Non-object values are ignored.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        if let Value::Object(map) = variables {
            self.variables = map;
        }
        self
    }

    /// Select the operation to run.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Wire payload `{query, variables?, operationName?}`.
    ///
    /// Empty variables and empty operation names are omitted.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        let _ = payload.insert("query".into(), Value::String(self.query.clone()));
        if !self.variables.is_empty() {
            let _ = payload.insert("variables".into(), Value::Object(self.variables.clone()));
        }
        if let Some(name) = self.operation_name.as_deref().filter(|n| !n.is_empty()) {
            let _ = payload.insert("operationName".into(), Value::String(name.to_owned()));
        }
        Value::Object(payload)
    }
}

impl From<&str> for GraphQLRequest {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

impl From<String> for GraphQLRequest {
    fn from(query: String) -> Self {
        Self::new(query)
    }
}
