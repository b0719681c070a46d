//! Error types and handling.

use thiserror::Error;

use crate::negotiation::ValidationError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Socket or file I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream before the expected frame arrived
    #[error("Connection closed while waiting for {0}")]
    EndOfStream(String),

    /// Frame content did not match the command script
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Value rejected by local validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Camera or ADC/DAC collaborator failed
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// External copy tool failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Could not establish the command connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation stopped by the user
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create an end-of-stream error naming the awaited frame
    pub fn end_of_stream(what: impl Into<String>) -> Self {
        Self::EndOfStream(what.into())
    }

    /// Create a protocol error with message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a hardware error with message
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    /// Create a transfer error with message
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    /// Create a config error with message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the command connection is unusable after this error.
    ///
    /// Validation and hardware-side reports leave the stream in sync; everything
    /// touching the transport does not.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::EndOfStream(_) | Self::Protocol(_) | Self::ConnectionFailed(_)
        )
    }
}
