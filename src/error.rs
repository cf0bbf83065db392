//! Error types for hivoice

use thiserror::Error;

/// Result type alias for hivoice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hivoice
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Could not reach the live model endpoint
    #[error("connection error: {0}")]
    Connection(String),

    /// Setup handshake failed or was never acknowledged
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Unexpected or malformed message on the live connection
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Text generation error
    #[error("generation error: {0}")]
    Generation(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error ends the session rather than a single operation
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Handshake(_) | Self::WebSocket(_)
        )
    }
}
