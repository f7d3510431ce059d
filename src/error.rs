use crate::config::ConfigError;
use crate::protocol::codec::DecodeError;
use crate::protocol::frame::Event;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TtsError>;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("Frame decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Service reported {event}: {message}")]
    ProtocolFailure { event: Event, message: String },

    #[error("Service error {code}: {message}")]
    ServerError { code: u32, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Failed to build request payload: {0}")]
    EncodingBuild(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Synthesis task failed: {0}")]
    TaskFailed(String),
}

impl TtsError {
    /// Whether the remote side (rather than the network or the caller) rejected the call.
    pub fn is_service_rejection(&self) -> bool {
        matches!(
            self,
            TtsError::ProtocolFailure { .. } | TtsError::ServerError { .. }
        )
    }
}

impl From<tokio::task::JoinError> for TtsError {
    fn from(err: tokio::task::JoinError) -> Self {
        TtsError::TaskFailed(err.to_string())
    }
}
