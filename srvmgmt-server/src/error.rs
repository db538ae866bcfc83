use std::borrow::Cow;

use serde_json::Value as JsonValue;
use srvmgmt_core::{HandOffError, ServiceError};
use srvmgmt_jsonrpc::{ErrorCode, ErrorDetails, JsonRpcError};
use thiserror::Error;

use crate::MethodId;

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

/// Failures building the method registry.  These happen once, at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid method id '{id}': {reason}")]
    InvalidMethodId { id: String, reason: &'static str },

    #[error("Method '{id}' is already registered")]
    Duplicate { id: MethodId },

    #[error("Error serializing the discovery document")]
    Discovery {
        #[source]
        source: serde_json::Error,
    },
}

/// Error returned by a method handler.
#[derive(Debug, Error)]
pub enum MethodError {
    /// The params decoded fine but don't make sense, e.g. an unknown game rule.  The message is
    /// sent to the caller.
    #[error("{0}")]
    InvalidParams(String),

    /// Anything else.  Logged, but never sent to the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl MethodError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}

impl From<ServiceError> for MethodError {
    fn from(e: ServiceError) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

impl From<HandOffError> for MethodError {
    fn from(e: HandOffError) -> Self {
        Self::Internal(e.into())
    }
}

/// Why an inbound message could not be answered with a result.
///
/// Each variant maps to one of the JSON-RPC reserved error codes.  The variant's detail goes into
/// the log; what goes to the peer is [`DispatchError::error_details`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Message is not valid JSON")]
    ParseError {
        #[source]
        source: JsonRpcError,
    },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: Cow<'static, str> },

    #[error("Method '{method}' not found")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Internal error")]
    InternalError {
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::ParseError { .. } => ErrorCode::ParseError,
            DispatchError::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            DispatchError::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            DispatchError::InvalidParams { .. } => ErrorCode::InvalidParams,
            DispatchError::InternalError { .. } => ErrorCode::InternalError,
        }
    }

    /// The error object sent to the peer.
    ///
    /// Internal errors never carry detail; everything else gets a short explanation in `data`.
    pub fn error_details(&self) -> ErrorDetails {
        let code = self.code();
        let data = match self {
            DispatchError::ParseError { source } => match source {
                JsonRpcError::ParseJson { source, .. } => Some(source.to_string()),
                _ => None,
            },
            DispatchError::InvalidRequest { reason } => Some(reason.to_string()),
            DispatchError::MethodNotFound { method } => Some(format!("Method not found: {method}")),
            DispatchError::InvalidParams { message } => Some(message.clone()),
            DispatchError::InternalError { .. } => None,
        };

        ErrorDetails::new(code, code.message(), data.map(JsonValue::String))
    }
}

impl From<MethodError> for DispatchError {
    fn from(e: MethodError) -> Self {
        match e {
            MethodError::InvalidParams(message) => DispatchError::InvalidParams { message },
            MethodError::Internal(source) => DispatchError::InternalError { source },
        }
    }
}

/// Misuse of an outgoing method descriptor, or a value that doesn't fit its schema.
#[derive(Debug, Error)]
pub enum OutgoingMethodError {
    #[error("Method '{method}' takes no params but was given some")]
    UnexpectedParams { method: MethodId },

    #[error("Method '{method}' requires params but none were given")]
    MissingParams { method: MethodId },

    #[error("Method '{method}' is a notification and has no result")]
    NoResult { method: MethodId },

    #[error("Error encoding params for method '{method}'")]
    EncodeParams {
        method: MethodId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error decoding result of method '{method}'")]
    DecodeResult {
        method: MethodId,
        #[source]
        source: serde_json::Error,
    },
}

/// How an outgoing request can fail to produce a result.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request '{method}' timed out waiting for a response")]
    Timeout { method: MethodId },

    #[error("Peer returned an error for request '{method}': {error}")]
    Remote { method: MethodId, error: JsonValue },

    #[error(transparent)]
    Outgoing(#[from] OutgoingMethodError),

    #[error("Connection closed before a response was received")]
    ConnectionClosed,
}

/// Failures sending on a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Outgoing(#[from] OutgoingMethodError),

    #[error("Connection is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Error binding listener to {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The server has already been stopped")]
    Stopped,

    #[error("The server is already listening on {addr}")]
    AlreadyListening { addr: std::net::SocketAddr },
}
