//! Crypto error types.

use thiserror::Error;

/// Errors from key handling, signing and encryption.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Serialized key checksum did not match.
    #[error("Key checksum mismatch")]
    InvalidChecksum,

    /// Key material is malformed or inconsistent.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Signature did not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Operation needs a private key but only a public key is available.
    #[error("Private key required")]
    MissingPrivateKey,

    /// Input shorter than its fixed layout.
    #[error("Input truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    /// I/O error while reading or writing a key file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
