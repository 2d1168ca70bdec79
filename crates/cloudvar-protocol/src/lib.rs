//! cloudvar Protocol - Wire protocol for cloud variable clients
//!
//! This crate provides the message types exchanged over the WebSocket:
//! inbound requests keyed by a `method` field, the outbound `set`
//! broadcast, and the numeric close codes used to end a connection.

pub mod close;
pub mod message;
pub mod parse;

pub use close::CloseCode;
pub use message::{
    CreateArgs, DeleteArgs, HandshakeArgs, Method, RenameArgs, ServerMessage, SetArgs,
};
pub use parse::{ProtocolError, RawRequest, METHOD_KEY};
