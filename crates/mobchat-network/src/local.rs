//! Identity of the running node.

use crate::handshake::Handshake;
use crate::routing::{Node, NodeId};
use crate::wire::Address;
use mobchat_crypto::PrivateKey;

/// The local private key, its derived ID, and the address advertised to
/// peers.
pub struct LocalNode {
    pub key: PrivateKey,
    pub id: NodeId,
    pub address: Address,
}

impl LocalNode {
    pub fn new(key: PrivateKey, address: Address) -> Self {
        let id = NodeId::from(key.public_key());
        Self { key, id, address }
    }

    /// Routing table entry for this node.
    pub fn node(&self) -> Node {
        Node::new(self.key.public_key().clone(), self.address)
    }

    /// Handshake announcing `address`: the advertised address to accept,
    /// [`Address::ZERO`] to reject.
    pub fn handshake(&self, address: Address) -> Handshake {
        Handshake::new(self.key.public_key().clone(), address)
    }
}
