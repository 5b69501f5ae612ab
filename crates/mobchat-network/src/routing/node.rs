//! Mesh participants.

use crate::wire::{Address, WireReader};
use crate::{NetworkError, NetworkResult, NODE_LEN};
use mobchat_crypto::{PublicKey, KEY_ID_LEN, PUBLIC_KEY_LEN};
use std::collections::BTreeSet;
use std::fmt;

/// Node identifier: SHA-256 of the node's public modulus.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; KEY_ID_LEN]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn read(reader: &mut WireReader<'_>) -> NetworkResult<Self> {
        reader.array().map(NodeId)
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl From<&PublicKey> for NodeId {
    fn from(key: &PublicKey) -> Self {
        NodeId(key.id())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

/// A known participant: its public key, advertised address, and the IDs of
/// the nodes it is known to be connected to.
#[derive(Debug, Clone)]
pub struct Node {
    pub public_key: PublicKey,
    pub address: Address,
    pub connections: BTreeSet<NodeId>,
}

impl Node {
    pub fn new(public_key: PublicKey, address: Address) -> Self {
        Self {
            public_key,
            address,
            connections: BTreeSet::new(),
        }
    }

    /// Identifier, always derived from the key.
    pub fn id(&self) -> NodeId {
        NodeId::from(&self.public_key)
    }

    pub fn is_server(&self) -> bool {
        self.address.is_server()
    }

    /// 144-byte wire form: public key followed by address.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NODE_LEN);
        out.extend_from_slice(&self.public_key.to_bytes());
        out.extend_from_slice(&self.address.serialize());
        out
    }

    /// Decode exactly [`NODE_LEN`] bytes; the connection set starts empty.
    pub fn deserialize(bytes: &[u8]) -> NetworkResult<Self> {
        if bytes.len() != NODE_LEN {
            return Err(NetworkError::MalformedInput(format!(
                "node must be {} bytes, got {}",
                NODE_LEN,
                bytes.len()
            )));
        }
        Self::read(&mut WireReader::new(bytes, "node"))
    }

    pub fn read(reader: &mut WireReader<'_>) -> NetworkResult<Self> {
        let public_key = PublicKey::from_bytes(reader.take(PUBLIC_KEY_LEN)?)?;
        let address = Address::read(reader)?;
        Ok(Self::new(public_key, address))
    }
}
