//! Hybrid encryption.
//!
//! A random session key is wrapped with RSA-OAEP/SHA-256 for the recipient.
//! The AES-256-GCM key is SHA-256 of the session key.
//!
//! ```text
//! encrypt:           wrappedKey(ENCRYPTED_KEY_LEN) ++ nonce(12) ++ ciphertext ++ tag(16)
//! sign_and_encrypt:  signature(SIGNATURE_LEN) ++ encrypt(...)
//! ```
//!
//! The signature covers the whole encrypted part and is checked before any
//! decryption is attempted.

use crate::{
    CryptoError, CryptoResult, PrivateKey, PublicKey, CIPHER_KEY_LEN, ENCRYPTED_KEY_LEN,
    NONCE_LEN, SIGNATURE_LEN, TAG_LEN,
};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::Oaep;
use sha2::{Digest, Sha256};

/// Generate a random session key.
pub fn generate_cipher_key() -> [u8; CIPHER_KEY_LEN] {
    let mut key = [0u8; CIPHER_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Wrap a session key for `recipient` with RSA-OAEP.
pub fn wrap_key(recipient: &PublicKey, cipher_key: &[u8]) -> CryptoResult<Vec<u8>> {
    recipient
        .rsa()
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), cipher_key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Unwrap a session key with the recipient's private key.
pub fn unwrap_key(key: &PrivateKey, wrapped: &[u8]) -> CryptoResult<Vec<u8>> {
    key.rsa()
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| CryptoError::Decryption("key cannot unlock this message".to_string()))
}

fn cipher(cipher_key: &[u8]) -> CryptoResult<Aes256Gcm> {
    let aes_key = Sha256::digest(cipher_key);
    Aes256Gcm::new_from_slice(&aes_key).map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// AES-256-GCM seal; returns `nonce ++ ciphertext ++ tag`.
pub fn seal(cipher_key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = cipher(cipher_key)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal`].
pub fn open(cipher_key: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Truncated {
            needed: NONCE_LEN + TAG_LEN,
            got: sealed.len(),
        });
    }
    let cipher = cipher(cipher_key)?;
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}

/// Encrypt `msg` for `recipient` under a fresh session key.
pub fn encrypt(recipient: &PublicKey, msg: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher_key = generate_cipher_key();
    let mut out = wrap_key(recipient, &cipher_key)?;
    out.extend_from_slice(&seal(&cipher_key, msg)?);
    Ok(out)
}

/// Decrypt the output of [`encrypt`].
pub fn decrypt(key: &PrivateKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.len() < ENCRYPTED_KEY_LEN {
        return Err(CryptoError::Truncated {
            needed: ENCRYPTED_KEY_LEN,
            got: data.len(),
        });
    }
    let (wrapped, sealed) = data.split_at(ENCRYPTED_KEY_LEN);
    let cipher_key = unwrap_key(key, wrapped)?;
    open(&cipher_key, sealed)
}

/// Encrypt `body` for `recipient` and sign the result as `sender`.
pub fn sign_and_encrypt(
    sender: &PrivateKey,
    recipient: &PublicKey,
    body: &[u8],
) -> CryptoResult<Vec<u8>> {
    let encrypted = encrypt(recipient, body)?;
    let mut out = sender.sign(&encrypted)?;
    out.extend_from_slice(&encrypted);
    Ok(out)
}

/// Verify the sender's signature, then decrypt with the recipient key.
pub fn verify_and_decrypt(
    sender: &PublicKey,
    recipient: &PrivateKey,
    data: &[u8],
) -> CryptoResult<Vec<u8>> {
    if data.len() < SIGNATURE_LEN {
        return Err(CryptoError::Truncated {
            needed: SIGNATURE_LEN,
            got: data.len(),
        });
    }
    let (signature, encrypted) = data.split_at(SIGNATURE_LEN);
    if !sender.verify(signature, encrypted) {
        return Err(CryptoError::InvalidSignature);
    }
    decrypt(recipient, encrypted)
}
