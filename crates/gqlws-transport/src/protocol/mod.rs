//! Wire protocol: dialects, the inbound codec and outbound messages.

pub mod codec;
pub mod dialect;
pub mod messages;

pub use codec::{Answer, AnswerKind, parse_answer};
pub use dialect::Dialect;
pub use messages::ClientMessage;
