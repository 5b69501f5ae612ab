//! # mobchat-crypto
//!
//! Identity keys and message protection for mobchat nodes.
//!
//! This crate provides:
//! - RSA identity keys with a compact, checksummed binary form
//! - RSA-PSS signatures over SHA-256
//! - Hybrid encryption (RSA-OAEP wrapped AES-256-GCM session keys)
//!
//! Every wire size exposed here is derived from [`KEY_BITS`], so the
//! fixed offsets used by the network layer follow the key size.

mod encrypt;
mod error;
mod keys;
mod signing;

pub use encrypt::{
    decrypt, encrypt, generate_cipher_key, open, seal, sign_and_encrypt, unwrap_key,
    verify_and_decrypt, wrap_key,
};
pub use error::{CryptoError, CryptoResult};
pub use keys::{Key, KeyId, PrivateKey, PublicKey};

/// RSA modulus size in bits.
pub const KEY_BITS: usize = 1024;

/// Modulus length in bytes.
pub const MODULUS_LEN: usize = KEY_BITS / 8;

/// Serialized public key: checksum (2) + zero marker (2) + modulus.
pub const PUBLIC_KEY_LEN: usize = 4 + MODULUS_LEN;

/// Serialized private key: checksum (2) + d length (2) + d + p + q + n.
pub const PRIVATE_KEY_LEN: usize = 4 + MODULUS_LEN * 3;

/// Length of a PSS signature.
pub const SIGNATURE_LEN: usize = MODULUS_LEN;

/// Length of an OAEP-wrapped session key.
pub const ENCRYPTED_KEY_LEN: usize = MODULUS_LEN;

/// Length of the random session key before hashing into an AES key.
pub const CIPHER_KEY_LEN: usize = 32;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Fixed public exponent.
pub const PUBLIC_EXPONENT: u32 = 65537;

/// Length of a key identifier (SHA-256 of the modulus).
pub const KEY_ID_LEN: usize = 32;
