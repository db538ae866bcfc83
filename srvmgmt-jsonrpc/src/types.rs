//! Rust struct definitions that ser/de to/from JSON-RPC messages.
//!
//! Outbound messages are strongly typed and serialized with serde.  Inbound messages are not
//! deserialized straight into these types, because the management protocol classifies an inbound
//! object by which of the `method`, `result` and `error` keys are present and must be able to
//! reply to malformed objects with the id they carried.  That classification is
//! [`Envelope::classify`].
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{JsonRpcError, Result};
/// Re-export the structs and enums that are part of the JSON-RPC protocol
///
/// No need to re-invent this wheel.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// Request Id
///
/// Numeric ids are kept as [`serde_json::Number`] so that whatever number the peer sent is echoed
/// back unchanged, including negative and fractional ids.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id
    Number(serde_json::Number),
    /// String id
    Str(String),
}

impl Id {
    /// Interpret an arbitrary JSON value as a request id.
    ///
    /// Only strings, numbers and `null` are ids; anything else yields `None`.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Id::Null),
            JsonValue::Number(number) => Some(Id::Number(number.clone())),
            JsonValue::String(s) => Some(Id::Str(s.clone())),
            _ => None,
        }
    }

    /// The locally generated transaction id this id represents, if it is a non-negative integer.
    pub fn as_transaction_id(&self) -> Option<u64> {
        match self {
            Id::Number(number) => number.as_u64(),
            _ => None,
        }
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id::Number(value.into())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(number) => write!(f, "{number}"),
            Id::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Serializable [JSON-RPC request object](https://www.jsonrpc.org/specification#request-object).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Request ID
    pub id: Id,
    /// Name of the method to be invoked.
    pub method: String,
    /// Parameter values of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl Request {
    /// Create a serializable JSON-RPC method call.
    pub fn new(id: Id, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            id,
            method: method.into(),
            params: params.into(),
        }
    }
}

/// Serializable [JSON-RPC notification object](https://www.jsonrpc.org/specification#request-object).
///
/// Differs from the request object in that it does not have an `id` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notification {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Name of the method to be invoked.
    pub method: String,
    /// Parameter values of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl Notification {
    /// Create a serializable JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            method: method.into(),
            params: params.into(),
        }
    }
}

/// JSON-RPC response object as defined in the [spec](https://www.jsonrpc.org/specification#response_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Payload which can be result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Request ID
    pub id: Id,
}

impl Response {
    pub fn new(id: Id, payload: ResponsePayload) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload,
            id,
        }
    }

    /// Create a owned successful response
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self::new(id, ResponsePayload::success(result))
    }

    /// Create an error response
    pub fn error(
        id: Id,
        code: ErrorCode,
        message: impl Into<String>,
        data: impl Into<Option<JsonValue>>,
    ) -> Self {
        Self::error_detail(id, ErrorDetails::new(code, message, data))
    }

    /// Create an error response from already-assembled error details
    pub fn error_detail(id: Id, details: ErrorDetails) -> Self {
        Self::new(id, ResponsePayload::error(details))
    }
}

/// Possible payloads of a JSON RPC response
///
/// This is an `untagged` enum so that serde will try to deserialize into each variant in order
/// until one succeeds.  This works because successs responses should have `result` and error
/// responses should have `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Corresponds to failed JSON-RPC response with a error object with the field `error.
    Error(ErrorResponse),
    /// Corresponds to successful JSON-RPC response with the field `result`.
    Success(SuccessResponse),
}

impl ResponsePayload {
    /// Create a successful response payload
    pub fn success(result: JsonValue) -> Self {
        ResponsePayload::Success(SuccessResponse { result })
    }

    /// Create an error response payload
    pub fn error(details: impl Into<ErrorDetails>) -> Self {
        ResponsePayload::Error(details.into().into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

impl From<JsonValue> for SuccessResponse {
    fn from(result: JsonValue) -> Self {
        Self { result }
    }
}

/// [Failed JSON-RPC response object](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

impl From<ErrorDetails> for ErrorResponse {
    fn from(error: ErrorDetails) -> Self {
        Self { error }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Code
    pub code: ErrorCode,
    /// Message
    pub message: String,
    /// Optional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ParseError, message, data)
    }
    pub fn invalid_request(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, data)
    }
    pub fn method_not_found(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, data)
    }
    pub fn invalid_params(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidParams, message, data)
    }
    pub fn internal_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InternalError, message, data)
    }
}

/// Every message this side ever writes to the wire.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A batch of messages; in practice only ever a batch of responses
    Batch(Vec<Message>),

    /// A request with method, id, and optional params
    Request(Request),

    /// A notification with method and optional params but no id
    Notification(Notification),

    /// A response containing either a result or error
    Response(Response),
}

impl Message {
    /// Serialize this message into the text form handed to the transport.
    ///
    /// This is fallible but unlikely to fail barring memory issues.
    pub fn into_string(self) -> Result<String> {
        serde_json::to_string(&self).map_err(|e| JsonRpcError::SerMessage {
            source: e,
            type_name: std::any::type_name::<Self>(),
        })
    }

    /// Parse the text of a message into an untyped JSON value.
    ///
    /// Whether that value is a valid JSON-RPC message is a separate question; see
    /// [`Envelope::classify`].
    pub fn parse(text: &str) -> Result<JsonValue> {
        serde_json::from_str(text).map_err(|e| JsonRpcError::ParseJson {
            source: e,
            json: text.to_string(),
        })
    }
}

/// A single inbound JSON-RPC object, classified by which of `method`, `result` and `error` it
/// carries.
///
/// Batches are not represented here; the caller splits an inbound array into its elements and
/// classifies each one on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A method call (`id` present) or notification (`id` absent) sent by the remote peer
    Call {
        id: Option<Id>,
        method: String,
        params: Option<JsonValue>,
    },

    /// A successful response to a request this side sent earlier
    Response { transaction_id: u64, result: JsonValue },

    /// A result with a numeric id that can't be one of our transaction ids, such as `-1` or
    /// `1.5`.  Nothing can be waiting for it.
    UnmatchedResponse { id: serde_json::Number },

    /// An error response.  It only correlates with one of our requests if the id is one of our
    /// transaction ids.
    Error {
        transaction_id: Option<u64>,
        error: JsonValue,
    },

    /// Something that is shaped wrong.  The id is whatever could be salvaged, `null` otherwise.
    Invalid { id: Id, reason: &'static str },
}

impl Envelope {
    /// Classify a JSON object according to which of `method`, `result` and `error` are present.
    ///
    /// The `jsonrpc` version member is not enforced.
    pub fn classify(mut object: serde_json::Map<String, JsonValue>) -> Self {
        let has_method = object.contains_key("method");
        let has_result = object.contains_key("result");
        let has_error = object.contains_key("error");

        match (has_method, has_result, has_error) {
            (true, false, false) => {
                let id = match object.get("id") {
                    None => None,
                    Some(value) => match Id::from_json(value) {
                        Some(id) => Some(id),
                        None => {
                            return Envelope::Invalid {
                                id: Id::Null,
                                reason: "Request id must be a string, number or null",
                            };
                        }
                    },
                };

                let method = match object.remove("method") {
                    Some(JsonValue::String(method)) => method,
                    _ => {
                        return Envelope::Invalid {
                            id: id.unwrap_or(Id::Null),
                            reason: "Method name must be a string",
                        };
                    }
                };

                let params = object.remove("params");

                Envelope::Call { id, method, params }
            }
            (false, true, false) => {
                let transaction_id = object
                    .get("id")
                    .and_then(Id::from_json)
                    .and_then(|id| id.as_transaction_id());

                match (transaction_id, object.remove("result")) {
                    (Some(transaction_id), Some(result)) => Envelope::Response { transaction_id, result },
                    _ => match object.get("id") {
                        Some(JsonValue::Number(id)) => Envelope::UnmatchedResponse { id: id.clone() },
                        _ => Envelope::Invalid {
                            id: Self::salvage_id(&object),
                            reason: "Response id must be a transaction id",
                        },
                    },
                }
            }
            (false, false, true) => {
                let transaction_id = object
                    .get("id")
                    .and_then(Id::from_json)
                    .and_then(|id| id.as_transaction_id());
                let error = object.remove("error").unwrap_or(JsonValue::Null);

                Envelope::Error { transaction_id, error }
            }
            _ => Envelope::Invalid {
                id: Self::salvage_id(&object),
                reason: "Message must contain exactly one of 'method', 'result' or 'error'",
            },
        }
    }

    fn salvage_id(object: &serde_json::Map<String, JsonValue>) -> Id {
        object.get("id").and_then(Id::from_json).unwrap_or(Id::Null)
    }
}
