//! Error types for the Beacon satellite

use thiserror::Error;

/// Result type alias for satellite operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the satellite
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (opening or configuring hardware)
    #[error("audio error: {0}")]
    Audio(String),

    /// Capture read failure
    #[error("capture error: {0}")]
    Capture(String),

    /// Playback write failure
    #[error("playback error: {0}")]
    Playback(String),

    /// Connection to the speech service failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation requires an open connection
    #[error("not connected")]
    NotConnected,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
