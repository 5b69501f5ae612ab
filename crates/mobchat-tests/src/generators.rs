//! Test data generators for integration tests.
//!
//! Provides node keys and ready-made nodes and routing tables.

use mobchat_crypto::PrivateKey;
use mobchat_network::{Address, Node, NodeId, RoutingTable};
use once_cell::sync::Lazy;

/// Number of shared test keys.
pub const KEY_COUNT: usize = 8;

/// Keys shared by every test in this binary. RSA generation is the slow
/// step, so it happens once.
pub static KEYS: Lazy<Vec<PrivateKey>> = Lazy::new(|| {
    (0..KEY_COUNT)
        .map(|_| PrivateKey::generate().expect("key generation"))
        .collect()
});

/// Shared key `i`, cloned.
pub fn test_key(i: usize) -> PrivateKey {
    KEYS[i % KEY_COUNT].clone()
}

/// Node for shared key `i` at `address`.
pub fn test_node(i: usize, address: Address) -> Node {
    Node::new(KEYS[i % KEY_COUNT].public_key().clone(), address)
}

/// Server-capable node for shared key `i`.
pub fn server_node(i: usize) -> Node {
    test_node(i, Address::server(9000 + i as u16))
}

/// ID of shared key `i`.
pub fn test_node_id(i: usize) -> NodeId {
    NodeId::from(KEYS[i % KEY_COUNT].public_key())
}

/// Routing table holding the given shared keys as server nodes, with a
/// directed edge for each `(from, to)` pair.
pub fn test_table(members: &[usize], edges: &[(usize, usize)]) -> RoutingTable {
    let table = RoutingTable::new();
    for &i in members {
        table.add_node(server_node(i));
    }
    for &(from, to) in edges {
        table.add_edge(&test_node_id(from), &test_node_id(to));
    }
    table
}
