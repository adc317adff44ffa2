//! Transport error types.

use thiserror::Error;

/// Errors that can occur talking to the transport backend.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Backend connection is not established
    #[error("not connected to transport")]
    NotConnected,

    /// Outbound publish failed
    #[error("publish failed: {0}")]
    Publish(String),

    /// Topic subscription failed
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Payload could not be serialized
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
