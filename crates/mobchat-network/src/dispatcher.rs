//! Inbound message handling.
//!
//! Every decoded frame from a connection passes through [`dispatch`], in
//! arrival order. Handlers never wait on I/O: replies and gossip are queued
//! on the connections' send channels. Bad input from a peer is dropped with
//! a log line; only a protocol violation or a forged handshake closes the
//! link.

use crate::connection::{Connection, TimerKind};
use crate::connections::Admission;
use crate::discovery::find_peers;
use crate::handshake::Handshake;
use crate::message::{
    Broadcast, MessageId, Payload, PeerConnected, PeerDisconnected, Relay,
};
use crate::routing::{Digest32, Node, NodeId, Route};
use crate::service::{MessageKind, NetworkContext, NetworkEvent};
use crate::wire::Address;
use crate::{Message, NetworkError, NetworkResult, MAX_ROUTE_DEPTH, PROTOCOL_VERSION};
use bytes::Bytes;
use mobchat_crypto::verify_and_decrypt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What the connection task does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Handle one message received on `conn`.
pub(crate) fn dispatch(
    ctx: &Arc<NetworkContext>,
    conn: &Arc<Connection>,
    message: Message,
) -> NetworkResult<Flow> {
    let id = message.id();
    if !ctx.record_seen(conn, id) {
        trace!(addr = %conn.addr(), "Duplicate message dropped");
        return Ok(Flow::Continue);
    }

    let body = if message.encrypted {
        let Some(sender) = conn.remote_key() else {
            warn!(addr = %conn.addr(), "Encrypted message before handshake dropped");
            return Ok(Flow::Continue);
        };
        match verify_and_decrypt(&sender, &ctx.local.key, &message.body) {
            Ok(plain) => Bytes::from(plain),
            Err(e) => {
                warn!(addr = %conn.addr(), error = %e, "Could not open encrypted message");
                return Ok(Flow::Continue);
            }
        }
    } else {
        message.body.clone()
    };

    match body.first() {
        Some(&PROTOCOL_VERSION) => {}
        version => {
            debug!(addr = %conn.addr(), ?version, "Unsupported protocol version");
            return Ok(Flow::Continue);
        }
    }

    let payload = match Payload::decode(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(addr = %conn.addr(), error = %e, "Dropping malformed message");
            return Ok(Flow::Continue);
        }
    };

    if !conn.handshake_done()
        && !matches!(payload, Payload::Handshake(_) | Payload::HandshakeResponse(_))
    {
        return Err(NetworkError::ProtocolViolation(format!(
            "{:?} before handshake",
            payload.command()
        )));
    }

    match payload {
        Payload::Handshake(hs) => on_handshake(ctx, conn, hs),
        Payload::HandshakeResponse(hs) => on_handshake_response(ctx, conn, hs),
        Payload::CheckRouting => {
            reply(conn, &Payload::CheckRoutingResponse(ctx.routing.check()));
            hold_for_sync(ctx, conn);
            Ok(Flow::Continue)
        }
        Payload::CheckRoutingResponse(digest) => Ok(on_check_routing_response(ctx, conn, digest)),
        Payload::GetRouting => {
            reply(conn, &Payload::GetRoutingResponse(ctx.routing.nodes()));
            hold_for_sync(ctx, conn);
            Ok(Flow::Continue)
        }
        Payload::GetRoutingResponse(nodes) => on_get_routing_response(ctx, conn, nodes),
        Payload::GetRoute { target } => {
            on_get_route(ctx, conn, id, &target);
            Ok(Flow::Continue)
        }
        Payload::GetRouteResponse { request_id, routes } => {
            if !ctx.pending.complete(&request_id, routes) {
                debug!(addr = %conn.addr(), "Unmatched route response dropped");
            }
            Ok(Flow::Continue)
        }
        Payload::Relay(relay) => {
            on_relay(ctx, conn, relay);
            Ok(Flow::Continue)
        }
        Payload::Broadcast(b) => {
            on_broadcast(ctx, conn, &message, b);
            Ok(Flow::Continue)
        }
        Payload::PeerConnected(pc) => {
            on_peer_connected(ctx, conn, &message, pc);
            Ok(Flow::Continue)
        }
        Payload::PeerDisconnected(pd) => {
            on_peer_disconnected(ctx, conn, &message, pd);
            Ok(Flow::Continue)
        }
        Payload::Generic(data) => {
            on_generic(ctx, conn, message.encrypted, data);
            Ok(Flow::Continue)
        }
        Payload::Unknown(code) => {
            debug!(addr = %conn.addr(), code = format_args!("{code:#04x}"), "Unknown command dropped");
            Ok(Flow::Continue)
        }
    }
}

fn reply(conn: &Connection, payload: &Payload) {
    if let Err(e) = conn.send(Message::plain(payload)) {
        warn!(addr = %conn.addr(), error = %e, "Failed to queue reply");
    }
}

/// Keep a non-peer link open only while routing exchange continues.
fn hold_for_sync(ctx: &NetworkContext, conn: &Connection) {
    if !conn.is_peer() {
        conn.arm_timer(TimerKind::Sync, ctx.config.timeouts.sync);
    }
}

fn check_identity(ctx: &NetworkContext, hs: &Handshake) -> NetworkResult<bool> {
    hs.verify_id()?;
    Ok(hs.id != ctx.local.id)
}

/// Acceptor side: admit or reject, answer, then start routing exchange.
fn on_handshake(
    ctx: &Arc<NetworkContext>,
    conn: &Arc<Connection>,
    hs: Handshake,
) -> NetworkResult<Flow> {
    if conn.is_outbound() || conn.handshake_done() {
        return Err(NetworkError::ProtocolViolation(
            "unexpected handshake".to_string(),
        ));
    }
    if !check_identity(ctx, &hs)? {
        info!(addr = %conn.addr(), "Connected to self, closing");
        return Ok(Flow::Close);
    }

    conn.complete_handshake(&hs);
    let admission = ctx
        .connections
        .admit_incoming(conn, &hs.id, ctx.config.max_incoming);
    let answer = match admission {
        Admission::Admitted => ctx.local.address,
        Admission::Full | Admission::Duplicate => Address::ZERO,
    };
    reply(conn, &Payload::HandshakeResponse(ctx.local.handshake(answer)));

    if admission == Admission::Admitted {
        let node = hs.to_node();
        ctx.routing.add_node(node.clone());
        ctx.routing.add_edge(&ctx.local.id, &hs.id);
        announce_connected(ctx, conn, &node);
        info!(addr = %conn.addr(), peer = %hs.id.short(), "Incoming peer admitted");
        ctx.emit(NetworkEvent::PeerConnected {
            id: hs.id,
            addr: conn.addr(),
        });
    } else {
        info!(addr = %conn.addr(), peer = %hs.id.short(), reason = ?admission, "Incoming peer rejected");
        conn.arm_timer(TimerKind::Sync, ctx.config.timeouts.sync);
    }

    if !ctx.is_synced() {
        reply(conn, &Payload::CheckRouting);
    }
    Ok(Flow::Continue)
}

fn announce_connected(ctx: &NetworkContext, source: &Connection, node: &Node) {
    match PeerConnected::sign(&ctx.local.key, node) {
        Ok(notice) => {
            let msg = Message::plain(&Payload::PeerConnected(notice));
            ctx.flood(&msg, Some(source));
        }
        Err(e) => warn!(error = %e, "Failed to sign peer connected notice"),
    }
}

/// Dialer side: a non-zero address means we were admitted.
fn on_handshake_response(
    ctx: &Arc<NetworkContext>,
    conn: &Arc<Connection>,
    hs: Handshake,
) -> NetworkResult<Flow> {
    if !conn.is_outbound() || conn.handshake_done() {
        return Err(NetworkError::ProtocolViolation(
            "unexpected handshake response".to_string(),
        ));
    }
    if !check_identity(ctx, &hs)? {
        info!(addr = %conn.addr(), "Dialed self, closing");
        return Ok(Flow::Close);
    }

    conn.complete_handshake(&hs);
    ctx.routing.clear_pending(&hs.id);

    if hs.is_connection() {
        ctx.routing.add_node(hs.to_node());
        ctx.routing.add_edge(&ctx.local.id, &hs.id);
        conn.promote();
        info!(addr = %conn.addr(), peer = %hs.id.short(), "Outgoing peer connected");
        ctx.emit(NetworkEvent::PeerConnected {
            id: hs.id,
            addr: conn.addr(),
        });
    } else {
        info!(addr = %conn.addr(), peer = %hs.id.short(), "Remote rejected us as a peer");
    }

    if !ctx.is_synced() {
        reply(conn, &Payload::CheckRouting);
        hold_for_sync(ctx, conn);
        return Ok(Flow::Continue);
    }

    let flow = if conn.is_peer() {
        Flow::Continue
    } else {
        Flow::Close
    };
    find_peers(ctx);
    Ok(flow)
}

fn on_check_routing_response(
    ctx: &Arc<NetworkContext>,
    conn: &Arc<Connection>,
    digest: Digest32,
) -> Flow {
    if !ctx.routing.compare(&digest) {
        debug!(addr = %conn.addr(), "Routing tables differ, requesting full table");
        reply(conn, &Payload::GetRouting);
        conn.set_sent_get_routing();
        hold_for_sync(ctx, conn);
        return Flow::Continue;
    }

    debug!(addr = %conn.addr(), "Routing tables agree");
    ctx.mark_synced();
    let flow = if conn.is_peer() {
        Flow::Continue
    } else {
        Flow::Close
    };
    find_peers(ctx);
    flow
}

fn on_get_routing_response(
    ctx: &Arc<NetworkContext>,
    conn: &Arc<Connection>,
    nodes: Vec<Node>,
) -> NetworkResult<Flow> {
    if !conn.take_sent_get_routing() {
        find_peers(ctx);
        return Err(NetworkError::ProtocolViolation(
            "unsolicited routing table".to_string(),
        ));
    }

    let added = ctx.routing.merge(nodes);
    info!(addr = %conn.addr(), added, total = ctx.routing.len(), "Merged routing table");
    ctx.mark_synced();
    hold_for_sync(ctx, conn);
    find_peers(ctx);
    Ok(Flow::Continue)
}

/// Answer a route query for the requester: searches start here and at the
/// server-capable nodes it is connected to, and every path begins with the
/// requester itself. The search never passes through the requester, so the
/// prefixed path visits each node once.
fn on_get_route(ctx: &NetworkContext, conn: &Connection, request_id: MessageId, target: &NodeId) {
    let Some(requester) = conn.remote_id() else {
        return;
    };
    let Some(head) = ctx.routing.get(&requester) else {
        debug!(addr = %conn.addr(), "Route request from unregistered node");
        reply(conn, &Payload::GetRouteResponse { request_id, routes: Vec::new() });
        return;
    };

    let mut starts = vec![ctx.local.id];
    for id in ctx.routing.connections_of(&requester).unwrap_or_default() {
        if id != requester && ctx.routing.get(&id).is_some_and(|n| n.is_server()) {
            starts.push(id);
        }
    }

    let routes: Vec<Route> = ctx
        .routing
        .find_route_avoiding(target, &starts, &requester)
        .into_iter()
        .filter_map(|mut route| {
            route.nodes.insert(0, head.clone());
            (route.hops() <= MAX_ROUTE_DEPTH).then_some(route)
        })
        .collect();

    debug!(
        addr = %conn.addr(),
        target = %target.short(),
        routes = routes.len(),
        "Answering route request"
    );
    reply(conn, &Payload::GetRouteResponse { request_id, routes });
}

fn on_relay(ctx: &NetworkContext, conn: &Connection, relay: Relay) {
    if !ctx.seen.lock().insert(relay.inner.id()) {
        trace!(addr = %conn.addr(), "Relay already handled");
        return;
    }

    if relay.target == ctx.local.id {
        deliver_relay(ctx, &relay);
        return;
    }

    let target = relay.target;
    if let Some(peer) = ctx.connections.peer_for(&target) {
        if let Err(e) = peer.send(Message::plain(&Payload::Relay(relay))) {
            warn!(peer = %target.short(), error = %e, "Relay hand-off failed");
        }
        return;
    }

    if usize::from(relay.hops) >= MAX_ROUTE_DEPTH {
        debug!(target = %target.short(), "Relay hop limit reached");
        return;
    }
    let forward = Relay {
        hops: relay.hops + 1,
        ..relay
    };
    ctx.connections
        .broadcast(&Message::plain(&Payload::Relay(forward)), Some(conn));
}

fn deliver_relay(ctx: &NetworkContext, relay: &Relay) {
    let Some(origin_key) = ctx.routing.public_key(&relay.origin) else {
        warn!(origin = %relay.origin.short(), "Relay from unknown origin dropped");
        return;
    };
    if !relay.inner.encrypted {
        warn!(origin = %relay.origin.short(), "Unencrypted relay dropped");
        return;
    }
    let plain = match verify_and_decrypt(&origin_key, &ctx.local.key, &relay.inner.body) {
        Ok(plain) => Bytes::from(plain),
        Err(e) => {
            warn!(origin = %relay.origin.short(), error = %e, "Could not open relayed message");
            return;
        }
    };
    match Payload::decode(&plain) {
        Ok(Payload::Generic(data)) => ctx.emit(NetworkEvent::MessageReceived {
            from: relay.origin,
            kind: MessageKind::Relayed,
            data,
        }),
        Ok(other) => debug!(command = ?other.command(), "Relayed non-generic payload dropped"),
        Err(e) => warn!(error = %e, "Malformed relayed payload"),
    }
}

/// Verify a signed notice against its sender's known key.
fn verified(ctx: &NetworkContext, sender: &NodeId, proof: &crate::message::Signed) -> bool {
    match ctx.routing.public_key(sender) {
        Some(key) if proof.verify(&key) => true,
        Some(_) => {
            warn!(sender = %sender.short(), "Bad signature on notice");
            false
        }
        None => {
            debug!(sender = %sender.short(), "Notice from unknown sender dropped");
            false
        }
    }
}

fn on_broadcast(ctx: &NetworkContext, conn: &Connection, message: &Message, b: Broadcast) {
    if b.sender == ctx.local.id || !verified(ctx, &b.sender, &b.proof) {
        return;
    }
    ctx.connections.broadcast(message, Some(conn));
    ctx.emit(NetworkEvent::MessageReceived {
        from: b.sender,
        kind: MessageKind::Broadcast,
        data: b.data,
    });
}

fn on_peer_connected(ctx: &NetworkContext, conn: &Connection, message: &Message, pc: PeerConnected) {
    if !verified(ctx, &pc.sender, &pc.proof) {
        return;
    }
    let id = pc.node.id();
    ctx.routing.add_node(pc.node);
    ctx.routing.add_edge(&pc.sender, &id);
    debug!(sender = %pc.sender.short(), peer = %id.short(), "Gossip: peer connected");
    ctx.connections.broadcast(message, Some(conn));
}

fn on_peer_disconnected(
    ctx: &NetworkContext,
    conn: &Connection,
    message: &Message,
    pd: PeerDisconnected,
) {
    if !verified(ctx, &pd.sender, &pd.proof) {
        return;
    }
    ctx.routing.remove_edge(&pd.sender, &pd.peer);
    debug!(sender = %pd.sender.short(), peer = %pd.peer.short(), "Gossip: peer disconnected");
    ctx.connections.broadcast(message, Some(conn));
}

fn on_generic(ctx: &NetworkContext, conn: &Connection, encrypted: bool, data: Bytes) {
    if !encrypted {
        warn!(addr = %conn.addr(), "Unencrypted direct message dropped");
        return;
    }
    let Some(from) = conn.remote_id() else {
        return;
    };
    ctx.emit(NetworkEvent::MessageReceived {
        from,
        kind: MessageKind::Direct,
        data,
    });
}
