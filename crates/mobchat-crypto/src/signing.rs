//! RSA-PSS signatures over SHA-256 with salt length equal to the hash size.

use crate::{CryptoError, CryptoResult, PrivateKey, PublicKey, SIGNATURE_LEN};
use rand::rngs::OsRng;
use rsa::Pss;
use sha2::{Digest, Sha256};

impl PrivateKey {
    /// Sign `msg`, producing a [`SIGNATURE_LEN`]-byte signature.
    pub fn sign(&self, msg: &[u8]) -> CryptoResult<Vec<u8>> {
        let hashed = Sha256::digest(msg);
        let signature = self
            .rsa()
            .sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &hashed)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        if signature.len() != SIGNATURE_LEN {
            return Err(CryptoError::Signing(format!(
                "unexpected signature length {}",
                signature.len()
            )));
        }
        Ok(signature)
    }
}

impl PublicKey {
    /// Check a signature over `msg`.
    pub fn verify(&self, signature: &[u8], msg: &[u8]) -> bool {
        if signature.len() != SIGNATURE_LEN {
            return false;
        }
        let hashed = Sha256::digest(msg);
        self.rsa()
            .verify(Pss::new::<Sha256>(), &hashed, signature)
            .is_ok()
    }
}
