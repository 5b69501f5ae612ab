//! Handshake body, shared by the Handshake and HandshakeResponse commands.
//!
//! ```text
//! +---------+---------+--------+------------+---------+
//! | Version | Command |   ID   | Public key | Address |
//! | 1 byte  | 1 byte  |   32   |    132     |   12    |
//! +---------+---------+--------+------------+---------+
//! ```
//!
//! A response carrying the all-zero address is a rejection.

use crate::message::Command;
use crate::routing::{Node, NodeId};
use crate::wire::{Address, WireReader};
use crate::{NetworkError, NetworkResult, HANDSHAKE_LEN, PROTOCOL_VERSION};
use mobchat_crypto::{PublicKey, PUBLIC_KEY_LEN};

/// Identity announcement exchanged when a connection opens.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub id: NodeId,
    pub public_key: PublicKey,
    pub address: Address,
}

impl Handshake {
    pub fn new(public_key: PublicKey, address: Address) -> Self {
        Self {
            id: NodeId::from(&public_key),
            public_key,
            address,
        }
    }

    /// Serialize with the given command byte.
    pub fn serialize(&self, command: Command) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_LEN);
        out.push(PROTOCOL_VERSION);
        out.push(command as u8);
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(&self.public_key.to_bytes());
        out.extend_from_slice(&self.address.serialize());
        out
    }

    /// Decode a full body, header included.
    pub fn deserialize(body: &[u8]) -> NetworkResult<Self> {
        let mut reader = WireReader::new(body, "handshake");
        reader.take(2)?;
        Self::read(&mut reader)
    }

    /// Decode the payload that follows the two header bytes.
    pub fn read(reader: &mut WireReader<'_>) -> NetworkResult<Self> {
        let id = NodeId::read(reader)?;
        let public_key = PublicKey::from_bytes(reader.take(PUBLIC_KEY_LEN)?)?;
        let address = Address::read(reader)?;
        Ok(Self {
            id,
            public_key,
            address,
        })
    }

    /// The claimed ID must be the hash of the embedded key.
    pub fn verify_id(&self) -> NetworkResult<()> {
        if self.id != NodeId::from(&self.public_key) {
            return Err(NetworkError::Crypto(mobchat_crypto::CryptoError::InvalidKey(
                format!("handshake id {} does not match its key", self.id.short()),
            )));
        }
        Ok(())
    }

    /// True when this handshake (as a response) accepted the connection.
    pub fn is_connection(&self) -> bool {
        self.address.is_connection()
    }

    /// The node this handshake describes.
    pub fn to_node(&self) -> Node {
        Node::new(self.public_key.clone(), self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::KEYS;
    use crate::ADDRESS_LEN;

    #[test]
    fn test_handshake_layout() {
        let hs = Handshake::new(KEYS[0].public_key().clone(), Address::server(9999));
        let bytes = hs.serialize(Command::Handshake);
        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], Command::Handshake as u8);
        assert_eq!(&bytes[2..34], hs.id.as_bytes());

        let decoded = Handshake::deserialize(&bytes).unwrap();
        assert_eq!(decoded.id, hs.id);
        assert_eq!(decoded.address, hs.address);
        assert_eq!(decoded.public_key, hs.public_key);
        decoded.verify_id().unwrap();
    }

    #[test]
    fn test_rejection_response() {
        let hs = Handshake::new(KEYS[1].public_key().clone(), Address::ZERO);
        let bytes = hs.serialize(Command::HandshakeResponse);
        assert_eq!(&bytes[HANDSHAKE_LEN - ADDRESS_LEN..], &[0u8; ADDRESS_LEN]);
        assert!(!Handshake::deserialize(&bytes).unwrap().is_connection());
    }

    #[test]
    fn test_truncated_handshake() {
        let hs = Handshake::new(KEYS[0].public_key().clone(), Address::server(1));
        let bytes = hs.serialize(Command::Handshake);
        for cut in [1, 33, 165, 177] {
            assert!(matches!(
                Handshake::deserialize(&bytes[..cut]),
                Err(NetworkError::MalformedInput(_))
            ));
        }
    }

    #[test]
    fn test_mismatched_id() {
        let mut hs = Handshake::new(KEYS[0].public_key().clone(), Address::server(1));
        hs.id = NodeId::from(KEYS[1].public_key());
        let decoded = Handshake::deserialize(&hs.serialize(Command::Handshake)).unwrap();
        assert!(matches!(decoded.verify_id(), Err(NetworkError::Crypto(_))));
    }

    #[test]
    fn test_corrupt_key_checksum() {
        let hs = Handshake::new(KEYS[0].public_key().clone(), Address::server(1));
        let mut bytes = hs.serialize(Command::Handshake);
        bytes[100] ^= 0xFF;
        assert!(matches!(
            Handshake::deserialize(&bytes),
            Err(NetworkError::Crypto(_))
        ));
    }
}
