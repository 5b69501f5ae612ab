//! Shortest-path route finding over the adjacency graph.

use super::node::{Node, NodeId};
use super::table::RoutingTable;
use crate::wire::WireReader;
use crate::{NetworkError, NetworkResult, MAX_ROUTE_DEPTH, NODE_LEN};
use std::collections::{HashMap, VecDeque};

/// An ordered list of nodes from the first hop to the target.
#[derive(Debug, Clone)]
pub struct Route {
    pub nodes: Vec<Node>,
}

impl Route {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Number of edges traversed.
    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(Node::id).collect()
    }
}

impl RoutingTable {
    /// Find every minimum-length path from any of `start_ids` to `target`,
    /// at most [`MAX_ROUTE_DEPTH`] hops long. A start equal to the target
    /// yields the single-node path. Paths through unknown IDs are dropped.
    pub fn find_route(&self, target: &NodeId, start_ids: &[NodeId]) -> Vec<Route> {
        self.search(target, start_ids, None)
    }

    /// Like [`RoutingTable::find_route`], but never steps onto `avoid`.
    /// Used when the answer will be prefixed with `avoid` itself.
    pub fn find_route_avoiding(
        &self,
        target: &NodeId,
        start_ids: &[NodeId],
        avoid: &NodeId,
    ) -> Vec<Route> {
        let starts: Vec<NodeId> = start_ids.iter().filter(|id| *id != avoid).copied().collect();
        self.search(target, &starts, Some(avoid))
    }

    fn search(&self, target: &NodeId, start_ids: &[NodeId], avoid: Option<&NodeId>) -> Vec<Route> {
        self.with_nodes(|nodes| {
            let id_paths = shortest_paths(target, start_ids, |id| {
                nodes
                    .get(id)
                    .map(|n| {
                        n.connections
                            .iter()
                            .filter(|next| Some(*next) != avoid)
                            .copied()
                            .collect()
                    })
                    .unwrap_or_default()
            });
            id_paths
                .into_iter()
                .filter_map(|path| {
                    path.iter()
                        .map(|id| nodes.get(id).cloned())
                        .collect::<Option<Vec<Node>>>()
                })
                .map(Route::new)
                .collect()
        })
    }
}

/// Breadth-first search from all starts at once. Each queued entry owns its
/// path. A node is only re-entered at a depth no greater than the first
/// depth it was reached at, so equal-length alternatives survive and longer
/// ones are pruned.
fn shortest_paths(
    target: &NodeId,
    start_ids: &[NodeId],
    neighbours: impl Fn(&NodeId) -> Vec<NodeId>,
) -> Vec<Vec<NodeId>> {
    let mut depth_reached: HashMap<NodeId, usize> = HashMap::new();
    let mut queue: VecDeque<Vec<NodeId>> = VecDeque::new();
    for start in start_ids {
        if depth_reached.insert(*start, 0).is_none() {
            queue.push_back(vec![*start]);
        }
    }

    let mut found: Vec<Vec<NodeId>> = Vec::new();
    let mut best: Option<usize> = None;

    while let Some(path) = queue.pop_front() {
        let depth = path.len() - 1;
        if best.is_some_and(|b| depth > b) {
            break;
        }
        let Some(last) = path.last().copied() else {
            continue;
        };
        if last == *target {
            best = Some(depth);
            found.push(path);
            continue;
        }
        if depth >= MAX_ROUTE_DEPTH {
            continue;
        }
        for next in neighbours(&last) {
            if path.contains(&next) {
                continue;
            }
            let next_depth = depth + 1;
            match depth_reached.get(&next) {
                Some(&seen) if seen < next_depth => continue,
                _ => {
                    depth_reached.insert(next, next_depth);
                }
            }
            let mut extended = path.clone();
            extended.push(next);
            queue.push_back(extended);
        }
    }
    found
}

/// Serialize routes: per route, `count (1) ++ count x node (144)`. The count
/// byte is the number of nodes, so a route of [`MAX_ROUTE_DEPTH`] hops
/// carries `MAX_ROUTE_DEPTH + 1` nodes.
pub fn serialize_routes(routes: &[Route]) -> Vec<u8> {
    let mut out = Vec::new();
    for route in routes {
        out.push(route.nodes.len() as u8);
        for node in &route.nodes {
            out.extend_from_slice(&node.serialize());
        }
    }
    out
}

/// Inverse of [`serialize_routes`]. An empty route, or one longer than
/// [`MAX_ROUTE_DEPTH`] hops, is malformed.
pub fn deserialize_routes(bytes: &[u8]) -> NetworkResult<Vec<Route>> {
    let mut reader = WireReader::new(bytes, "routes");
    let mut routes = Vec::new();
    while reader.remaining() > 0 {
        let count = reader.u8()? as usize;
        if count == 0 || count - 1 > MAX_ROUTE_DEPTH {
            return Err(NetworkError::MalformedInput(format!(
                "route with {count} nodes exceeds {MAX_ROUTE_DEPTH} hops"
            )));
        }
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(Node::deserialize(reader.take(NODE_LEN)?)?);
        }
        routes.push(Route::new(nodes));
    }
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::KEYS;
    use crate::wire::Address;

    fn table(n: usize) -> (RoutingTable, Vec<NodeId>) {
        let table = RoutingTable::new();
        let mut ids = Vec::new();
        for key in KEYS.iter().take(n) {
            let node = Node::new(key.public_key().clone(), Address::server(1));
            ids.push(node.id());
            table.add_node(node);
        }
        (table, ids)
    }

    fn link(table: &RoutingTable, a: &NodeId, b: &NodeId) {
        table.add_edge(a, b);
        table.add_edge(b, a);
    }

    #[test]
    fn test_route_through_middle() {
        let (table, ids) = table(3);
        link(&table, &ids[0], &ids[1]);
        link(&table, &ids[1], &ids[2]);

        let routes = table.find_route(&ids[2], &[ids[0]]);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].ids(), vec![ids[0], ids[1], ids[2]]);
        assert_eq!(routes[0].hops(), 2);
    }

    #[test]
    fn test_start_is_target() {
        let (table, ids) = table(2);
        let routes = table.find_route(&ids[0], &[ids[0]]);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].hops(), 0);
    }

    #[test]
    fn test_equal_length_paths_both_returned() {
        // 0 -> 1 -> 3 and 0 -> 2 -> 3
        let (table, ids) = table(4);
        link(&table, &ids[0], &ids[1]);
        link(&table, &ids[0], &ids[2]);
        link(&table, &ids[1], &ids[3]);
        link(&table, &ids[2], &ids[3]);

        let routes = table.find_route(&ids[3], &[ids[0]]);
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.hops() == 2));
    }

    #[test]
    fn test_longer_paths_dropped() {
        // 0 -> 3 directly, and 0 -> 1 -> 2 -> 3
        let (table, ids) = table(4);
        link(&table, &ids[0], &ids[3]);
        link(&table, &ids[0], &ids[1]);
        link(&table, &ids[1], &ids[2]);
        link(&table, &ids[2], &ids[3]);

        let routes = table.find_route(&ids[3], &[ids[0]]);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].ids(), vec![ids[0], ids[3]]);
    }

    #[test]
    fn test_minimum_across_starts() {
        let (table, ids) = table(4);
        link(&table, &ids[0], &ids[1]);
        link(&table, &ids[1], &ids[3]);
        link(&table, &ids[2], &ids[3]);

        let routes = table.find_route(&ids[3], &[ids[0], ids[2]]);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].ids(), vec![ids[2], ids[3]]);
    }

    #[test]
    fn test_no_path() {
        let (table, ids) = table(3);
        link(&table, &ids[0], &ids[1]);
        assert!(table.find_route(&ids[2], &[ids[0]]).is_empty());
        assert!(table.find_route(&ids[2], &[]).is_empty());
    }

    #[test]
    fn test_unknown_start_dropped() {
        let (table, ids) = table(2);
        let stranger = NodeId([7u8; 32]);
        assert!(table.find_route(&stranger, &[stranger]).is_empty());
        assert!(table.find_route(&ids[1], &[stranger]).is_empty());
    }

    #[test]
    fn test_depth_bound() {
        let ids: Vec<NodeId> = (0..15u8).map(|i| NodeId([i; 32])).collect();
        let chain = |id: &NodeId| -> Vec<NodeId> {
            let i = id.0[0] as usize;
            if i + 1 < ids.len() {
                vec![ids[i + 1]]
            } else {
                Vec::new()
            }
        };
        assert_eq!(shortest_paths(&ids[10], &[ids[0]], chain).len(), 1);
        assert!(shortest_paths(&ids[11], &[ids[0]], chain).is_empty());
    }

    #[test]
    fn test_routes_wire_roundtrip() {
        let (table, ids) = table(3);
        link(&table, &ids[0], &ids[1]);
        link(&table, &ids[1], &ids[2]);
        let routes = table.find_route(&ids[2], &[ids[0]]);

        let bytes = serialize_routes(&routes);
        assert_eq!(bytes.len(), 1 + 3 * NODE_LEN);
        assert_eq!(bytes[0], 3);

        let decoded = deserialize_routes(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].ids(), routes[0].ids());
        assert!(deserialize_routes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_route_length_bound_on_wire() {
        let (table, _) = table(1);
        let node = table.nodes().remove(0);
        let longest = Route::new(vec![node.clone(); MAX_ROUTE_DEPTH + 1]);
        assert_eq!(longest.hops(), MAX_ROUTE_DEPTH);
        let decoded = deserialize_routes(&serialize_routes(&[longest])).unwrap();
        assert_eq!(decoded[0].hops(), MAX_ROUTE_DEPTH);

        let too_long = Route::new(vec![node; MAX_ROUTE_DEPTH + 2]);
        assert!(matches!(
            deserialize_routes(&serialize_routes(&[too_long])),
            Err(NetworkError::MalformedInput(_))
        ));
        assert!(deserialize_routes(&[0]).is_err());
    }

    #[test]
    fn test_avoided_node_never_on_path() {
        // 0 - 1 - 2 - 3, and 1 - 4 - 3 around 2
        let (table, ids) = table(5);
        link(&table, &ids[0], &ids[1]);
        link(&table, &ids[1], &ids[2]);
        link(&table, &ids[2], &ids[3]);
        link(&table, &ids[1], &ids[4]);
        link(&table, &ids[4], &ids[3]);
        link(&table, &ids[0], &ids[3]);

        // Shortest from 1 goes back through 0.
        let plain = table.find_route(&ids[3], &[ids[1]]);
        assert!(plain.iter().any(|r| r.ids().contains(&ids[0])));

        let routes = table.find_route_avoiding(&ids[3], &[ids[1], ids[0]], &ids[0]);
        assert!(!routes.is_empty());
        for route in &routes {
            assert!(!route.ids().contains(&ids[0]));
            assert_eq!(route.hops(), 2);
        }
    }
}
