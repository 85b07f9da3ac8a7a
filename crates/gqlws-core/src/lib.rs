//! # gqlws-core
//!
//! Foundation types shared by the GraphQL websocket transport crates:
//!
//! - **Errors**: [`TransportError`] taxonomy via `thiserror`, split into
//!   operation-scoped and transport-fatal failures
//! - **Results**: [`ExecutionResult`] as delivered to callers
//! - **Requests**: [`GraphQLRequest`], the rendered `{query, variables, operationName}` payload
//! - **Logging**: [`logging::init_subscriber`] for setting up `tracing`

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod request;

pub use errors::{Result, TransportError};
pub use request::{ExecutionResult, GraphQLRequest};
