//! # mobchat-network
//!
//! Peer-to-peer overlay for mobchat nodes.
//!
//! This crate provides:
//! - The wire codec: addresses, nodes, handshakes, messages and framing
//! - Connection admission and the connection set
//! - The routing table, its membership digest and route finding
//! - The message dispatcher with flood gossip and relay forwarding
//! - Peer discovery and the network service

mod codec;
mod connection;
mod connections;
pub mod discovery;
mod dispatcher;
mod error;
mod handshake;
mod local;
mod message;
mod pending;
pub mod routing;
mod service;
pub mod wire;

pub mod dedup;

pub use codec::FrameCodec;
pub use connection::{Connection, ConnectionInfo, Phase, TimerKind};
pub use connections::{Admission, ConnectionSet};
pub use error::{NetworkError, NetworkResult};
pub use handshake::Handshake;
pub use local::LocalNode;
pub use message::{
    Broadcast, Command, Message, MessageId, Payload, PeerConnected, PeerDisconnected, Relay,
    Signed, MESSAGE_HEADER_LEN,
};
pub use pending::PendingRequests;
pub use routing::{Node, NodeId, Route, RoutingTable};
pub use service::{
    Advertise, MessageKind, NetworkCommand, NetworkConfig, NetworkEvent, NetworkHandle,
    NetworkService, TimeoutConfig,
};
pub use wire::Address;

use mobchat_crypto::PUBLIC_KEY_LEN;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9999;

/// The only protocol version dispatched.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Maximum frame size.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10 MiB

/// Longest route, in hops. Also bounds relay forwarding.
pub const MAX_ROUTE_DEPTH: usize = 10;

/// Message IDs remembered per connection.
pub const CONNECTION_SEEN_CAPACITY: usize = 100;

/// Message IDs remembered per node.
pub const GLOBAL_SEEN_CAPACITY: usize = 10_000;

/// Serialized address: 4 IP octets + 8-byte port.
pub const ADDRESS_LEN: usize = 12;

pub const NODE_ID_LEN: usize = 32;

/// Serialized node: public key + address.
pub const NODE_LEN: usize = PUBLIC_KEY_LEN + ADDRESS_LEN;

/// Serialized handshake: version + command + ID + public key + address.
pub const HANDSHAKE_LEN: usize = 2 + NODE_ID_LEN + PUBLIC_KEY_LEN + ADDRESS_LEN;
