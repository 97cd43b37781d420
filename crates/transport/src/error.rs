//! Transport Error Types

use thiserror::Error;

/// Error type for socket and wire operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// WebSocket connection error
    #[error("connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Send attempted with no open socket
    #[error("not connected")]
    NotConnected,

    /// Endpoint URL is not valid
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
