//! Peer discovery.
//!
//! Bootstrap addresses come from the `checkin` list. After that, new peers
//! are found in the routing table: each time routing state converges, the
//! first server-capable node that is not yet connected gets one dial.

use crate::service::{spawn_dial, NetworkContext};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Dial at most one new server-capable node from the routing table.
///
/// No-op once the outgoing limit is reached. The chosen node is marked
/// pending until its dial finishes, so a second call picks another node.
pub(crate) fn find_peers(ctx: &Arc<NetworkContext>) {
    if ctx.is_shutting_down() {
        return;
    }
    let outgoing = ctx.connections.count_outgoing();
    if outgoing >= ctx.config.max_outgoing {
        debug!(outgoing, "Outgoing limit reached, skipping discovery");
        return;
    }

    let local = ctx.local.id;
    let candidate = ctx.routing.claim_first(|node| {
        node.id() != local && node.is_server() && !ctx.connections.contains(node)
    });
    let Some(node) = candidate else {
        debug!("No new peers to dial");
        return;
    };

    let addr = node.address.dial_addr();
    info!(peer = %node.id().short(), addr = %addr, "Discovered peer, dialing");
    spawn_dial(ctx.clone(), addr, Some(node.id()));
}

/// Parse a peer address string (with optional port).
pub fn parse_peer_address(addr: &str, default_port: u16) -> Option<SocketAddr> {
    let addr = addr.trim();
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Some(socket_addr);
    }

    if !addr.contains(':') {
        if let Ok(socket_addr) = format!("{}:{}", addr, default_port).parse::<SocketAddr>() {
            return Some(socket_addr);
        }
    }

    addr.to_socket_addrs().ok()?.next()
}

/// Resolve a comma-separated `checkin` list. Entries that fail to resolve
/// in time are logged and skipped; duplicates are removed.
pub async fn resolve_checkin(list: &str, default_port: u16, limit: Duration) -> Vec<SocketAddr> {
    let mut peers = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let owned = entry.to_string();
        let result = timeout(
            limit,
            tokio::task::spawn_blocking(move || parse_peer_address(&owned, default_port)),
        )
        .await;

        match result {
            Ok(Ok(Some(addr))) => peers.push(addr),
            Ok(Ok(None)) => warn!(entry = %entry, "Could not resolve checkin entry"),
            Ok(Err(e)) => warn!(entry = %entry, error = %e, "Checkin resolution task failed"),
            Err(_) => warn!(entry = %entry, "Checkin resolution timed out"),
        }
    }

    peers.sort();
    peers.dedup();
    peers
}
