use std::any::Any;

use thiserror::Error;

/// Failures reported by the host's management services.
///
/// These are the caller's fault (an unknown rule, a value out of range) and are reported to the
/// remote peer as invalid params.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown game rule '{key}'")]
    UnknownGameRule { key: String },

    #[error("Game rule '{key}' expects a {expected} value")]
    GameRuleType { key: String, expected: &'static str },

    #[error("Invalid value for setting '{setting}': {reason}")]
    InvalidSetting { setting: &'static str, reason: String },
}

/// Failure to get a task executed by the host's main thread.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandOffError {
    #[error("The main thread task queue is no longer running")]
    Stopped,

    #[error("The main thread dropped the task before it completed, most likely because it panicked")]
    Abandoned,
}

/// Best-effort extraction of the message from a panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
