//! Postgres wire protocol, startup and authentication subset
//!
//! Only the messages exchanged before `ReadyForQuery` are modelled: startup,
//! SSL negotiation, authentication requests and responses, parameter status,
//! backend key data, notices and errors.

pub mod constants;
mod decode;
mod encode;
mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage};
