use thiserror::Error;

pub type Result<T, E = JsonRpcError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum JsonRpcError {
    #[error("Message is not valid JSON")]
    ParseJson {
        source: serde_json::Error,
        json: String,
    },

    #[error("Error serializing {type_name} to JSON")]
    SerMessage {
        source: serde_json::Error,
        type_name: &'static str,
    },

    #[error("Transport error")]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}
