//! Error types for the listener engine
use thiserror::Error;

/// Listener engine errors
#[derive(Error, Debug)]
pub enum SacnError {
    /// Universe number outside the E1.31 range
    #[error("Invalid sACN universe: {0} (must be 1-63999)")]
    InvalidUniverse(u16),

    /// Failed to bind or configure the receive socket
    #[error("Socket error: {0}")]
    SocketError(#[from] std::io::Error),

    /// Listener command issued in the wrong state
    #[error("Listener state error: {0}")]
    ListenerState(String),

    /// No source with the given CID in the registry
    #[error("Unknown source: {0}")]
    UnknownSource(uuid::Uuid),

    /// No listener for the given universe
    #[error("No listener for universe {0}")]
    UnknownListener(u16),
}

/// Result type for listener operations
pub type Result<T> = std::result::Result<T, SacnError>;
