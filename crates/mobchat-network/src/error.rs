//! Network error types.

use mobchat_crypto::CryptoError;
use std::net::SocketAddr;
use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A frame or field is shorter than its fixed wire size, or an index is
    /// out of range.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Signature, decryption or key checksum failure.
    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// A message arrived that the connection state does not allow.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Dialing a peer failed.
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No peer connection to the requested node.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// Node is not present in the routing table.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Frame too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The network service is no longer running.
    #[error("Network service stopped")]
    ServiceStopped,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    pub(crate) fn truncated(what: &str, needed: usize, got: usize) -> Self {
        NetworkError::MalformedInput(format!("{what}: need {needed} bytes, got {got}"))
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
