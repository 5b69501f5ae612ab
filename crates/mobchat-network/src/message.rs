//! Message envelope and command payloads.
//!
//! Envelope wire form:
//!
//! ```text
//! +-----------+-----------+--------------------+
//! | Encrypted | Timestamp |        Body        |
//! |  1 byte   | 8 bytes   |   (rest of frame)  |
//! +-----------+-----------+--------------------+
//! ```
//!
//! The (decrypted) body starts with a version byte and a command byte,
//! followed by the command payload. The message ID is
//! `SHA-256(body ++ timestamp)`.

use crate::handshake::Handshake;
use crate::routing::{
    deserialize_nodes, deserialize_routes, serialize_nodes, serialize_routes, Digest32, Node,
    NodeId, Route,
};
use crate::wire::WireReader;
use crate::{
    NetworkError, NetworkResult, NODE_ID_LEN, NODE_LEN, PROTOCOL_VERSION,
};
use bytes::{BufMut, Bytes, BytesMut};
use mobchat_crypto::{PrivateKey, PublicKey, SIGNATURE_LEN};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Envelope header: encrypted flag (1) + timestamp (8).
pub const MESSAGE_HEADER_LEN: usize = 9;

/// Message identifier.
pub type MessageId = [u8; 32];

/// A framed unit exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub encrypted: bool,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub body: Bytes,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(body: impl Into<Bytes>, encrypted: bool) -> Self {
        Self {
            encrypted,
            timestamp: now_nanos(),
            body: body.into(),
        }
    }

    /// Unencrypted message carrying `payload`.
    pub fn plain(payload: &Payload) -> Self {
        Self::new(payload.encode(), false)
    }

    pub fn id(&self) -> MessageId {
        let mut hasher = Sha256::new();
        hasher.update(&self.body);
        hasher.update(self.timestamp.to_be_bytes());
        hasher.finalize().into()
    }

    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_LEN + self.body.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(self.encrypted));
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.body);
    }

    pub fn decode(frame: Bytes) -> NetworkResult<Self> {
        if frame.len() < MESSAGE_HEADER_LEN {
            return Err(NetworkError::truncated(
                "message",
                MESSAGE_HEADER_LEN,
                frame.len(),
            ));
        }
        let encrypted = match frame[0] {
            0x00 => false,
            0x01 => true,
            other => {
                return Err(NetworkError::MalformedInput(format!(
                    "invalid encrypted flag {other:#04x}"
                )))
            }
        };
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&frame[1..MESSAGE_HEADER_LEN]);
        Ok(Self {
            encrypted,
            timestamp: u64::from_be_bytes(ts),
            body: frame.slice(MESSAGE_HEADER_LEN..),
        })
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Handshake = 0x01,
    HandshakeResponse = 0x02,
    CheckRouting = 0x03,
    CheckRoutingResponse = 0x04,
    GetRouting = 0x05,
    GetRoutingResponse = 0x06,
    GetRoute = 0x07,
    GetRouteResponse = 0x08,
    RelayMessage = 0x09,
    BroadcastMessage = 0x10,
    PeerConnected = 0x11,
    PeerDisconnected = 0x12,
    Generic = 0x13,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Handshake),
            0x02 => Some(Command::HandshakeResponse),
            0x03 => Some(Command::CheckRouting),
            0x04 => Some(Command::CheckRoutingResponse),
            0x05 => Some(Command::GetRouting),
            0x06 => Some(Command::GetRoutingResponse),
            0x07 => Some(Command::GetRoute),
            0x08 => Some(Command::GetRouteResponse),
            0x09 => Some(Command::RelayMessage),
            0x10 => Some(Command::BroadcastMessage),
            0x11 => Some(Command::PeerConnected),
            0x12 => Some(Command::PeerDisconnected),
            0x13 => Some(Command::Generic),
            _ => None,
        }
    }
}

fn header(command: Command) -> Vec<u8> {
    vec![PROTOCOL_VERSION, command as u8]
}

/// A body prefix and the signature over it, kept byte-exact so a verified
/// notice can be forwarded untouched.
#[derive(Debug, Clone)]
pub struct Signed {
    signed: Bytes,
    signature: Bytes,
}

impl Signed {
    fn create(key: &PrivateKey, prefix: Vec<u8>) -> NetworkResult<Self> {
        let signature = key.sign(&prefix)?;
        Ok(Self {
            signed: Bytes::from(prefix),
            signature: Bytes::from(signature),
        })
    }

    fn split(body: &Bytes, signed_len: usize) -> Self {
        Self {
            signed: body.slice(..signed_len),
            signature: body.slice(signed_len..),
        }
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        key.verify(&self.signature, &self.signed)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.signed.len() + self.signature.len());
        out.extend_from_slice(&self.signed);
        out.extend_from_slice(&self.signature);
        out
    }
}

/// `senderID (32) ++ node (144) ++ signature`: sender is now connected to
/// node.
#[derive(Debug, Clone)]
pub struct PeerConnected {
    pub sender: NodeId,
    pub node: Node,
    pub proof: Signed,
}

impl PeerConnected {
    pub fn sign(key: &PrivateKey, node: &Node) -> NetworkResult<Self> {
        let sender = NodeId::from(key.public_key());
        let mut prefix = header(Command::PeerConnected);
        prefix.extend_from_slice(sender.as_bytes());
        prefix.extend_from_slice(&node.serialize());
        Ok(Self {
            sender,
            node: node.clone(),
            proof: Signed::create(key, prefix)?,
        })
    }
}

/// `senderID (32) ++ peerID (32) ++ signature`: sender lost its link to peer.
#[derive(Debug, Clone)]
pub struct PeerDisconnected {
    pub sender: NodeId,
    pub peer: NodeId,
    pub proof: Signed,
}

impl PeerDisconnected {
    pub fn sign(key: &PrivateKey, peer: &NodeId) -> NetworkResult<Self> {
        let sender = NodeId::from(key.public_key());
        let mut prefix = header(Command::PeerDisconnected);
        prefix.extend_from_slice(sender.as_bytes());
        prefix.extend_from_slice(peer.as_bytes());
        Ok(Self {
            sender,
            peer: *peer,
            proof: Signed::create(key, prefix)?,
        })
    }
}

/// `senderID (32) ++ data ++ signature`: application data flooded to every
/// node.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub sender: NodeId,
    pub data: Bytes,
    pub proof: Signed,
}

impl Broadcast {
    pub fn sign(key: &PrivateKey, data: &[u8]) -> NetworkResult<Self> {
        let sender = NodeId::from(key.public_key());
        let mut prefix = header(Command::BroadcastMessage);
        prefix.extend_from_slice(sender.as_bytes());
        prefix.extend_from_slice(data);
        Ok(Self {
            sender,
            data: Bytes::copy_from_slice(data),
            proof: Signed::create(key, prefix)?,
        })
    }
}

/// `targetID (32) ++ originID (32) ++ hops (1) ++ inner message`.
#[derive(Debug, Clone)]
pub struct Relay {
    pub target: NodeId,
    pub origin: NodeId,
    pub hops: u8,
    pub inner: Message,
}

/// Decoded command body.
#[derive(Debug, Clone)]
pub enum Payload {
    Handshake(Handshake),
    HandshakeResponse(Handshake),
    CheckRouting,
    CheckRoutingResponse(Digest32),
    GetRouting,
    GetRoutingResponse(Vec<Node>),
    GetRoute { target: NodeId },
    GetRouteResponse { request_id: MessageId, routes: Vec<Route> },
    Relay(Relay),
    Broadcast(Broadcast),
    PeerConnected(PeerConnected),
    PeerDisconnected(PeerDisconnected),
    Generic(Bytes),
    Unknown(u8),
}

impl Payload {
    /// Decode a body, header included. Each variant checks its minimum
    /// length before reading.
    pub fn decode(body: &Bytes) -> NetworkResult<Self> {
        let mut reader = WireReader::new(body, "message body");
        let _version = reader.u8()?;
        let code = reader.u8()?;
        let Some(command) = Command::from_byte(code) else {
            return Ok(Payload::Unknown(code));
        };

        let payload = match command {
            Command::Handshake => Payload::Handshake(Handshake::read(&mut reader)?),
            Command::HandshakeResponse => {
                Payload::HandshakeResponse(Handshake::read(&mut reader)?)
            }
            Command::CheckRouting => Payload::CheckRouting,
            Command::CheckRoutingResponse => Payload::CheckRoutingResponse(reader.array()?),
            Command::GetRouting => Payload::GetRouting,
            Command::GetRoutingResponse => {
                Payload::GetRoutingResponse(deserialize_nodes(reader.rest())?)
            }
            Command::GetRoute => Payload::GetRoute {
                target: NodeId::read(&mut reader)?,
            },
            Command::GetRouteResponse => Payload::GetRouteResponse {
                request_id: reader.array()?,
                routes: deserialize_routes(reader.rest())?,
            },
            Command::RelayMessage => {
                let target = NodeId::read(&mut reader)?;
                let origin = NodeId::read(&mut reader)?;
                let hops = reader.u8()?;
                let inner = Message::decode(body.slice(reader.position()..))?;
                Payload::Relay(Relay {
                    target,
                    origin,
                    hops,
                    inner,
                })
            }
            Command::BroadcastMessage => {
                let sender = NodeId::read(&mut reader)?;
                let data_len = reader
                    .remaining()
                    .checked_sub(SIGNATURE_LEN)
                    .ok_or_else(|| {
                        NetworkError::truncated(
                            "broadcast",
                            2 + NODE_ID_LEN + SIGNATURE_LEN,
                            body.len(),
                        )
                    })?;
                let start = reader.position();
                let signed_len = start + data_len;
                Payload::Broadcast(Broadcast {
                    sender,
                    data: body.slice(start..signed_len),
                    proof: Signed::split(body, signed_len),
                })
            }
            Command::PeerConnected => {
                let signed_len = 2 + NODE_ID_LEN + NODE_LEN;
                expect_len(body, "peer connected", signed_len + SIGNATURE_LEN)?;
                let sender = NodeId::read(&mut reader)?;
                let node = Node::deserialize(reader.take(NODE_LEN)?)?;
                Payload::PeerConnected(PeerConnected {
                    sender,
                    node,
                    proof: Signed::split(body, signed_len),
                })
            }
            Command::PeerDisconnected => {
                let signed_len = 2 + NODE_ID_LEN * 2;
                expect_len(body, "peer disconnected", signed_len + SIGNATURE_LEN)?;
                let sender = NodeId::read(&mut reader)?;
                let peer = NodeId::read(&mut reader)?;
                Payload::PeerDisconnected(PeerDisconnected {
                    sender,
                    peer,
                    proof: Signed::split(body, signed_len),
                })
            }
            Command::Generic => Payload::Generic(body.slice(reader.position()..)),
        };
        Ok(payload)
    }

    /// Serialize to a body, header included.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Handshake(hs) => hs.serialize(Command::Handshake),
            Payload::HandshakeResponse(hs) => hs.serialize(Command::HandshakeResponse),
            Payload::CheckRouting => header(Command::CheckRouting),
            Payload::CheckRoutingResponse(digest) => {
                let mut out = header(Command::CheckRoutingResponse);
                out.extend_from_slice(digest);
                out
            }
            Payload::GetRouting => header(Command::GetRouting),
            Payload::GetRoutingResponse(nodes) => {
                let mut out = header(Command::GetRoutingResponse);
                let refs: Vec<&Node> = nodes.iter().collect();
                out.extend_from_slice(&serialize_nodes(&refs));
                out
            }
            Payload::GetRoute { target } => {
                let mut out = header(Command::GetRoute);
                out.extend_from_slice(target.as_bytes());
                out
            }
            Payload::GetRouteResponse { request_id, routes } => {
                let mut out = header(Command::GetRouteResponse);
                out.extend_from_slice(request_id);
                out.extend_from_slice(&serialize_routes(routes));
                out
            }
            Payload::Relay(relay) => {
                let mut out = header(Command::RelayMessage);
                out.extend_from_slice(relay.target.as_bytes());
                out.extend_from_slice(relay.origin.as_bytes());
                out.push(relay.hops);
                out.extend_from_slice(&relay.inner.encode());
                out
            }
            Payload::Broadcast(b) => b.proof.encode(),
            Payload::PeerConnected(pc) => pc.proof.encode(),
            Payload::PeerDisconnected(pd) => pd.proof.encode(),
            Payload::Generic(data) => {
                let mut out = header(Command::Generic);
                out.extend_from_slice(data);
                out
            }
            Payload::Unknown(code) => vec![PROTOCOL_VERSION, *code],
        }
    }

    pub fn command(&self) -> Option<Command> {
        match self {
            Payload::Handshake(_) => Some(Command::Handshake),
            Payload::HandshakeResponse(_) => Some(Command::HandshakeResponse),
            Payload::CheckRouting => Some(Command::CheckRouting),
            Payload::CheckRoutingResponse(_) => Some(Command::CheckRoutingResponse),
            Payload::GetRouting => Some(Command::GetRouting),
            Payload::GetRoutingResponse(_) => Some(Command::GetRoutingResponse),
            Payload::GetRoute { .. } => Some(Command::GetRoute),
            Payload::GetRouteResponse { .. } => Some(Command::GetRouteResponse),
            Payload::Relay(_) => Some(Command::RelayMessage),
            Payload::Broadcast(_) => Some(Command::BroadcastMessage),
            Payload::PeerConnected(_) => Some(Command::PeerConnected),
            Payload::PeerDisconnected(_) => Some(Command::PeerDisconnected),
            Payload::Generic(_) => Some(Command::Generic),
            Payload::Unknown(_) => None,
        }
    }
}

fn expect_len(body: &[u8], what: &str, needed: usize) -> NetworkResult<()> {
    if body.len() < needed {
        return Err(NetworkError::truncated(what, needed, body.len()));
    }
    Ok(())
}
