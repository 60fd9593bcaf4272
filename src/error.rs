//! Error types for Voxlet

use thiserror::Error;

/// Result type alias for Voxlet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Voxlet
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access denied or unavailable
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Avatar video error
    #[error("avatar error: {0}")]
    Avatar(String),

    /// Conversation backend error
    #[error("webhook error: {0}")]
    Webhook(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("toml serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}
