//! RSA identity keys and their binary form.
//!
//! Public key layout:
//!
//! ```text
//! +----------+--------+-----------------+
//! | Checksum | Marker |     Modulus     |
//! | 2 bytes  | 0x0000 | MODULUS_LEN     |
//! +----------+--------+-----------------+
//! ```
//!
//! Private key layout (the marker holds the length of `d`):
//!
//! ```text
//! +----------+------+---+---+---+---+
//! | Checksum | dLen | d | p | q | n |
//! +----------+------+---+---+---+---+
//! ```
//!
//! The checksum is the first two bytes of SHA-256 over everything after it.
//! Every big integer is left-padded to its fixed width.

use crate::{
    CryptoError, CryptoResult, KEY_BITS, KEY_ID_LEN, MODULUS_LEN, PUBLIC_EXPONENT,
    PUBLIC_KEY_LEN,
};
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Key identifier: SHA-256 of the big-endian modulus.
pub type KeyId = [u8; KEY_ID_LEN];

/// Public half of an identity key.
#[derive(Clone)]
pub struct PublicKey {
    inner: RsaPublicKey,
    id: KeyId,
}

impl PublicKey {
    /// Build a public key from a big-endian modulus with the fixed exponent.
    pub fn from_modulus(modulus: &[u8]) -> CryptoResult<Self> {
        let n = BigUint::from_bytes_be(modulus);
        let inner = RsaPublicKey::new(n, BigUint::from(PUBLIC_EXPONENT))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::from_rsa(inner))
    }

    fn from_rsa(inner: RsaPublicKey) -> Self {
        let id = modulus_id(&inner);
        Self { inner, id }
    }

    /// Identifier derived from the modulus.
    pub fn id(&self) -> KeyId {
        self.id
    }

    /// Lowercase hex form of the identifier.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Modulus, left-padded to [`MODULUS_LEN`] bytes.
    pub fn modulus_bytes(&self) -> Vec<u8> {
        padded_be(self.inner.n(), MODULUS_LEN)
    }

    /// Serialize to the fixed public key layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(PUBLIC_KEY_LEN - 2);
        body.extend_from_slice(&[0x00, 0x00]);
        body.extend_from_slice(&self.modulus_bytes());
        with_checksum(body)
    }

    /// Deserialize from exactly [`PUBLIC_KEY_LEN`] bytes. The length marker
    /// must be zero.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if let Some(marker) = bytes.get(2..4) {
            if marker != [0x00, 0x00] {
                return Err(CryptoError::InvalidKey(
                    "public key slot carries a private exponent length".to_string(),
                ));
            }
        }
        match Key::from_bytes(bytes)? {
            Key::Public(key) => Ok(key),
            Key::Private(_) => Err(CryptoError::InvalidKey(
                "expected a public key, found a private key".to_string(),
            )),
        }
    }

    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.inner
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.id_hex()[..16])
    }
}

/// Identity key pair.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
    public: PublicKey,
}

impl PrivateKey {
    /// Generate a fresh [`KEY_BITS`]-bit key.
    pub fn generate() -> CryptoResult<Self> {
        let inner = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_rsa(inner))
    }

    fn from_rsa(inner: RsaPrivateKey) -> Self {
        let public = PublicKey::from_rsa(inner.to_public_key());
        Self { inner, public }
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Identifier of the public half.
    pub fn id(&self) -> KeyId {
        self.public.id()
    }

    /// Serialize to the fixed private key layout.
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        let primes = self.inner.primes();
        if primes.len() != 2 {
            return Err(CryptoError::InvalidKey(format!(
                "expected two primes, found {}",
                primes.len()
            )));
        }
        let half = MODULUS_LEN / 2;
        let mut body = Vec::with_capacity(2 + MODULUS_LEN * 3);
        body.extend_from_slice(&(MODULUS_LEN as u16).to_be_bytes());
        body.extend_from_slice(&padded_be(self.inner.d(), MODULUS_LEN));
        body.extend_from_slice(&padded_be(&primes[0], half));
        body.extend_from_slice(&padded_be(&primes[1], half));
        body.extend_from_slice(&padded_be(self.inner.n(), MODULUS_LEN));
        Ok(with_checksum(body))
    }

    /// Deserialize a private key; a public-only blob is rejected.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        match Key::from_bytes(bytes)? {
            Key::Private(key) => Ok(key),
            Key::Public(_) => Err(CryptoError::MissingPrivateKey),
        }
    }

    /// Read a key file written by [`PrivateKey::save`].
    pub fn load(path: &Path) -> CryptoResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Write the key to a file.
    pub fn save(&self, path: &Path) -> CryptoResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.inner
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", &self.public.id_hex()[..16])
    }
}

/// A deserialized key of either kind.
#[derive(Debug, Clone)]
pub enum Key {
    /// Public-only key.
    Public(PublicKey),
    /// Full key pair.
    Private(PrivateKey),
}

impl Key {
    /// Deserialize either layout, dispatching on the length marker.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < 4 {
            return Err(CryptoError::Truncated {
                needed: 4,
                got: bytes.len(),
            });
        }
        let expected: [u8; 2] = checksum(&bytes[2..]);
        if bytes[0..2] != expected[..] {
            return Err(CryptoError::InvalidChecksum);
        }

        let d_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let rest = &bytes[4..];
        if d_len == 0 {
            if rest.len() != MODULUS_LEN {
                return Err(CryptoError::InvalidKey(format!(
                    "public modulus must be {} bytes, got {}",
                    MODULUS_LEN,
                    rest.len()
                )));
            }
            return PublicKey::from_modulus(rest).map(Key::Public);
        }

        let half = d_len / 2;
        let needed = d_len * 2;
        if rest.len() <= needed {
            return Err(CryptoError::Truncated {
                needed: needed + 1,
                got: rest.len(),
            });
        }
        let d = BigUint::from_bytes_be(&rest[..d_len]);
        let p = BigUint::from_bytes_be(&rest[d_len..d_len + half]);
        let q = BigUint::from_bytes_be(&rest[d_len + half..needed]);
        let n = BigUint::from_bytes_be(&rest[needed..]);

        let mut inner =
            RsaPrivateKey::from_components(n, BigUint::from(PUBLIC_EXPONENT), d, vec![p, q])
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        inner
            .validate()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        inner
            .precompute()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Key::Private(PrivateKey::from_rsa(inner)))
    }

    /// Public half of the key.
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Key::Public(key) => key,
            Key::Private(key) => key.public_key(),
        }
    }

    /// Serialize in the layout matching the key kind.
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        match self {
            Key::Public(key) => Ok(key.to_bytes()),
            Key::Private(key) => key.to_bytes(),
        }
    }
}

fn modulus_id(key: &RsaPublicKey) -> KeyId {
    let digest = Sha256::digest(key.n().to_bytes_be());
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&digest);
    id
}

fn checksum(data: &[u8]) -> [u8; 2] {
    let digest = Sha256::digest(data);
    [digest[0], digest[1]]
}

fn with_checksum(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(&checksum(&body));
    out.extend_from_slice(&body);
    out
}

fn padded_be(value: &BigUint, width: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    if raw.len() >= width {
        return raw;
    }
    let mut out = vec![0u8; width - raw.len()];
    out.extend_from_slice(&raw);
    out
}
