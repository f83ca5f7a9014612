//! Error types for Voicewire

use thiserror::Error;

/// Result type alias for Voicewire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice streaming client
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone permission was refused by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device is present
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),

    /// Capture was started without a granted permission
    #[error("capture not permitted: request microphone permission first")]
    NotPermitted,

    /// Inbound audio payload could not be decoded
    #[error("malformed audio buffer: {0}")]
    MalformedBuffer(String),

    /// Explicit connect/reconnect attempt failed
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Send attempted while the connection is not open
    #[error("send failed: not connected")]
    SendFailed,

    /// Automatic reconnection gave up after the configured maximum
    #[error("reconnect attempts exhausted")]
    MaxReconnectAttempts,

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
