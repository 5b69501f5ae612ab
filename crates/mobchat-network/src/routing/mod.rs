//! Routing table: known nodes, their adjacency, digest-based sync and route
//! finding.

mod find;
mod node;
mod table;

pub use find::{deserialize_routes, serialize_routes, Route};
pub use node::{Node, NodeId};
pub use table::{deserialize_nodes, serialize_nodes, Digest32, RoutingTable};
