//! The JSON-RPC 2.0 wire layer of the `srvmgmt` management protocol.
//!
//! This crate knows nothing about methods, registries or the game server.  It only knows how to
//! build and read JSON-RPC envelopes, how to classify an inbound JSON object into one of the
//! envelope kinds, and how to move whole text messages to and from a remote peer via the
//! [`Transport`] abstraction.
//!
//! Everything that gives those envelopes meaning lives in `srvmgmt-server`.

mod error;
mod transport;
mod types;

pub use error::{JsonRpcError, Result};
pub use transport::{Peer, Transport};
pub use types::{
    Envelope, ErrorCode, ErrorDetails, ErrorResponse, Id, JsonValue, Message, Notification, Request,
    Response, ResponsePayload, SuccessResponse, TwoPointZero,
};
