//! The node registry and adjacency graph.
//!
//! Serialized form:
//!
//! ```text
//! nodeCount (4, BE)
//! nodeCount x node (144)
//! nodeCount x { connectionCount (1), connectionCount x index (4, BE) }
//! ```
//!
//! Indices are positions in the node array, written in the same order.

use super::node::{Node, NodeId};
use crate::wire::WireReader;
use crate::{NetworkError, NetworkResult, NODE_LEN};
use mobchat_crypto::PublicKey;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Membership digest of a routing table.
pub type Digest32 = [u8; 32];

#[derive(Default)]
struct TableInner {
    nodes: BTreeMap<NodeId, Node>,
    /// Nodes with an outbound dial in flight.
    pending: HashSet<NodeId>,
}

/// Thread-safe routing table.
pub struct RoutingTable {
    inner: RwLock<TableInner>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner::default()),
        }
    }

    /// Insert a node unless its ID is already present. Returns true if
    /// inserted. An existing entry, including its adjacency, is kept.
    pub fn add_node(&self, node: Node) -> bool {
        let id = node.id();
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&id) {
            return false;
        }
        debug!(node = %id.short(), address = %node.address, "Added node to routing table");
        inner.nodes.insert(id, node);
        true
    }

    /// Record that `from` is connected to `to`. Returns false if `from` is
    /// unknown.
    pub fn add_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        match self.inner.write().nodes.get_mut(from) {
            Some(node) => {
                node.connections.insert(*to);
                true
            }
            None => false,
        }
    }

    /// Drop the edge `from -> to`.
    pub fn remove_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        match self.inner.write().nodes.get_mut(from) {
            Some(node) => node.connections.remove(to),
            None => false,
        }
    }

    /// Delete a node and scrub it from every adjacency set.
    pub fn remove_node(&self, id: &NodeId) -> Option<Node> {
        let mut inner = self.inner.write();
        let removed = inner.nodes.remove(id)?;
        for node in inner.nodes.values_mut() {
            node.connections.remove(id);
        }
        inner.pending.remove(id);
        Some(removed)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner.read().nodes.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.inner.read().nodes.get(id).cloned()
    }

    pub fn public_key(&self, id: &NodeId) -> Option<PublicKey> {
        self.inner
            .read()
            .nodes
            .get(id)
            .map(|n| n.public_key.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All nodes, in ID order.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// Adjacency of a node, if known.
    pub fn connections_of(&self, id: &NodeId) -> Option<Vec<NodeId>> {
        self.inner
            .read()
            .nodes
            .get(id)
            .map(|n| n.connections.iter().copied().collect())
    }

    /// Membership digest: SHA-256 over the sorted, concatenated hex IDs.
    /// Edges and addresses do not contribute.
    pub fn check(&self) -> Digest32 {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner.nodes.keys().map(NodeId::to_hex).collect();
        ids.sort();

        let mut hasher = Sha256::new();
        for id in &ids {
            hasher.update(id.as_bytes());
        }
        hasher.finalize().into()
    }

    /// True when `digest` equals the local digest.
    pub fn compare(&self, digest: &[u8]) -> bool {
        digest == self.check().as_slice()
    }

    /// Mark a node as having a dial in flight. Returns false if it already
    /// was.
    pub fn mark_pending(&self, id: &NodeId) -> bool {
        self.inner.write().pending.insert(*id)
    }

    pub fn clear_pending(&self, id: &NodeId) {
        self.inner.write().pending.remove(id);
    }

    pub fn is_pending(&self, id: &NodeId) -> bool {
        self.inner.read().pending.contains(id)
    }

    /// Run `f` over the nodes under a single read lock.
    pub(crate) fn with_nodes<R>(&self, f: impl FnOnce(&BTreeMap<NodeId, Node>) -> R) -> R {
        f(&self.inner.read().nodes)
    }

    /// Scan nodes in ID order and pick the first that satisfies `accept`,
    /// marking it pending under the same lock.
    pub(crate) fn claim_first(&self, mut accept: impl FnMut(&Node) -> bool) -> Option<Node> {
        let mut inner = self.inner.write();
        let TableInner { nodes, pending } = &mut *inner;
        let node = nodes
            .iter()
            .find(|(id, node)| !pending.contains(*id) && accept(node))
            .map(|(_, node)| node.clone())?;
        pending.insert(node.id());
        Some(node)
    }

    /// Serialize the whole table.
    pub fn serialize(&self) -> Vec<u8> {
        let inner = self.inner.read();
        let nodes: Vec<&Node> = inner.nodes.values().collect();
        serialize_nodes(&nodes)
    }

    /// Merge every node from a received table. Returns how many were new.
    pub fn merge(&self, nodes: Vec<Node>) -> usize {
        nodes
            .into_iter()
            .map(|node| self.add_node(node))
            .filter(|added| *added)
            .count()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize nodes and their adjacency in the routing table layout. Edges
/// to nodes outside `nodes` are skipped; at most 255 edges per node are
/// written.
pub fn serialize_nodes(nodes: &[&Node]) -> Vec<u8> {
    let index: HashMap<NodeId, u32> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id(), i as u32))
        .collect();

    let mut out = Vec::with_capacity(4 + nodes.len() * (NODE_LEN + 1));
    out.extend_from_slice(&(nodes.len() as u32).to_be_bytes());
    for node in nodes {
        out.extend_from_slice(&node.serialize());
    }
    for node in nodes {
        let targets: Vec<u32> = node
            .connections
            .iter()
            .filter_map(|id| index.get(id).copied())
            .take(u8::MAX as usize)
            .collect();
        out.push(targets.len() as u8);
        for i in targets {
            out.extend_from_slice(&i.to_be_bytes());
        }
    }
    out
}

/// Inverse of [`serialize_nodes`]: rebuild the node array, then resolve
/// each connection index against it.
pub fn deserialize_nodes(bytes: &[u8]) -> NetworkResult<Vec<Node>> {
    let mut reader = WireReader::new(bytes, "routing table");
    let count = reader.u32()? as usize;
    if count.saturating_mul(NODE_LEN) > reader.remaining() {
        return Err(NetworkError::truncated(
            "routing table",
            4 + count.saturating_mul(NODE_LEN),
            bytes.len(),
        ));
    }

    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(Node::deserialize(reader.take(NODE_LEN)?)?);
    }
    let ids: Vec<NodeId> = nodes.iter().map(Node::id).collect();

    for node in nodes.iter_mut() {
        let edges = reader.u8()?;
        for _ in 0..edges {
            let index = reader.u32()? as usize;
            let target = ids.get(index).ok_or_else(|| {
                NetworkError::MalformedInput(format!(
                    "connection index {index} out of range for {count} nodes"
                ))
            })?;
            node.connections.insert(*target);
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::KEYS;
    use crate::wire::Address;

    fn node(i: usize) -> Node {
        Node::new(KEYS[i].public_key().clone(), Address::server(9000 + i as u16))
    }

    #[test]
    fn test_add_node_first_writer_wins() {
        let table = RoutingTable::new();
        let mut first = node(0);
        first.connections.insert(node(1).id());
        assert!(table.add_node(first));

        let mut second = node(0);
        second.address = Address::server(1);
        assert!(!table.add_node(second));

        let stored = table.get(&node(0).id()).unwrap();
        assert_eq!(stored.address, Address::server(9000));
        assert_eq!(stored.connections.len(), 1);
    }

    #[test]
    fn test_remove_node_scrubs_edges() {
        let table = RoutingTable::new();
        for i in 0..3 {
            table.add_node(node(i));
        }
        let (a, b, c) = (node(0).id(), node(1).id(), node(2).id());
        table.add_edge(&a, &b);
        table.add_edge(&c, &b);
        table.add_edge(&b, &a);

        assert!(table.remove_node(&b).is_some());
        assert_eq!(table.len(), 2);
        assert!(table.connections_of(&a).unwrap().is_empty());
        assert!(table.connections_of(&c).unwrap().is_empty());
        assert!(table.remove_node(&b).is_none());
    }

    #[test]
    fn test_check_is_membership_only() {
        let one = RoutingTable::new();
        let two = RoutingTable::new();
        for i in [0, 1, 2] {
            one.add_node(node(i));
        }
        for i in [2, 0, 1] {
            let mut n = node(i);
            n.address = Address::server(1234);
            two.add_node(n);
        }
        two.add_edge(&node(0).id(), &node(1).id());

        assert_eq!(one.check(), two.check());
        assert!(one.compare(&two.check()));

        one.remove_node(&node(2).id());
        assert_ne!(one.check(), two.check());
    }

    #[test]
    fn test_check_hashes_sorted_hex() {
        let table = RoutingTable::new();
        table.add_node(node(0));
        table.add_node(node(1));
        let mut ids = vec![node(0).id().to_hex(), node(1).id().to_hex()];
        ids.sort();
        let expected: Digest32 = Sha256::digest(ids.concat().as_bytes()).into();
        assert_eq!(table.check(), expected);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let table = RoutingTable::new();
        for i in 0..3 {
            table.add_node(node(i));
        }
        table.add_edge(&node(0).id(), &node(1).id());
        table.add_edge(&node(0).id(), &node(2).id());
        table.add_edge(&node(2).id(), &node(0).id());

        let bytes = table.serialize();
        let nodes = deserialize_nodes(&bytes).unwrap();
        assert_eq!(nodes.len(), 3);

        let copy = RoutingTable::new();
        copy.merge(nodes);
        assert_eq!(copy.check(), table.check());
        for n in table.nodes() {
            assert_eq!(copy.get(&n.id()).unwrap().connections, n.connections);
        }
    }

    #[test]
    fn test_serialize_layout() {
        let table = RoutingTable::new();
        table.add_node(node(0));
        table.add_node(node(1));
        let a = node(0).id();
        let b = node(1).id();
        table.add_edge(&a, &b);

        let bytes = table.serialize();
        assert_eq!(&bytes[..4], &2u32.to_be_bytes());
        let edges = &bytes[4 + 2 * NODE_LEN..];
        // One edge block per node, in the same order as the node array.
        let first_is_a = table.nodes()[0].id() == a;
        if first_is_a {
            assert_eq!(edges, &[1, 0, 0, 0, 1, 0]);
        } else {
            assert_eq!(edges, &[0, 1, 0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_index_out_of_range() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&node(0).serialize());
        bytes.push(1);
        bytes.extend_from_slice(&5u32.to_be_bytes());
        assert!(matches!(
            deserialize_nodes(&bytes),
            Err(NetworkError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_truncated_table() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&node(0).serialize());
        assert!(deserialize_nodes(&bytes).is_err());
        assert!(deserialize_nodes(&[0, 0]).is_err());
    }

    #[test]
    fn test_pending_claim() {
        let table = RoutingTable::new();
        table.add_node(node(0));
        table.add_node(node(1));

        let first = table.claim_first(|_| true).unwrap();
        assert!(table.is_pending(&first.id()));
        let second = table.claim_first(|_| true).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(table.claim_first(|_| true).is_none());

        table.clear_pending(&first.id());
        assert_eq!(table.claim_first(|_| true).unwrap().id(), first.id());
    }
}
