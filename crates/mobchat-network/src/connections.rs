//! The set of open connections.
//!
//! One write lock covers the map and, for admission, the promotion of the
//! admitted connection, so the incoming-peer count cannot race a second
//! accept. Lock order is always set first, then connection.

use crate::connection::{Connection, ConnectionInfo};
use crate::routing::{Node, NodeId};
use crate::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of an inbound admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Incoming peer slots are full.
    Full,
    /// Another peer link to the same node is already open.
    Duplicate,
}

/// Open connections keyed by remote socket address.
#[derive(Default)]
pub struct ConnectionSet {
    inner: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<Connection>) {
        let key = conn.key();
        if let Some(old) = self.inner.write().insert(key, conn) {
            warn!(addr = %old.addr(), "Replaced connection with the same address");
        }
    }

    /// Remove this exact connection. Idempotent.
    pub fn remove(&self, conn: &Arc<Connection>) -> bool {
        let mut inner = self.inner.write();
        let key = conn.key();
        match inner.get(&key) {
            Some(existing) if Arc::ptr_eq(existing, conn) => {
                inner.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections the remote side dialed.
    pub fn count_incoming(&self) -> usize {
        self.inner
            .read()
            .values()
            .filter(|c| !c.is_outbound())
            .count()
    }

    /// Connections this side dialed.
    pub fn count_outgoing(&self) -> usize {
        self.inner
            .read()
            .values()
            .filter(|c| c.is_outbound())
            .count()
    }

    pub fn count_peers(&self) -> usize {
        self.inner.read().values().filter(|c| c.is_peer()).count()
    }

    /// True when some connection already reaches `node`, either by its
    /// handshake identity or by its dialed address.
    pub fn contains(&self, node: &Node) -> bool {
        let id = node.id();
        let dial = node.address.dial_addr();
        self.inner
            .read()
            .values()
            .any(|c| c.remote_id() == Some(id) || (c.is_outbound() && c.addr() == dial))
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.inner.read().contains_key(&addr.to_string())
    }

    /// Peer connection to `id`, if any.
    pub fn peer_for(&self, id: &NodeId) -> Option<Arc<Connection>> {
        self.inner
            .read()
            .values()
            .find(|c| c.is_peer() && c.remote_id().as_ref() == Some(id))
            .cloned()
    }

    pub fn peers(&self) -> Vec<Arc<Connection>> {
        self.inner
            .read()
            .values()
            .filter(|c| c.is_peer())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.inner.read().values().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.inner.read().values().map(|c| c.info()).collect()
    }

    /// Queue `message` on every peer except `except`. Never waits; a failed
    /// send is logged and skipped. Returns the number of peers reached.
    pub fn broadcast(&self, message: &Message, except: Option<&Connection>) -> usize {
        let mut sent = 0;
        for conn in self.peers() {
            if except.is_some_and(|e| std::ptr::eq(e, conn.as_ref())) {
                continue;
            }
            match conn.send(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(addr = %conn.addr(), error = %e, "Broadcast send failed"),
            }
        }
        sent
    }

    /// Decide whether an inbound connection that finished its handshake
    /// becomes a peer, and promote it if so.
    ///
    /// `max_incoming` caps inbound peers, not sockets. Links still in their
    /// handshake hold no slot, and the count and the promotion happen under
    /// one write lock, so concurrent handshakes can never promote past the
    /// cap. The handshake timer bounds how long an unadmitted link lingers.
    pub fn admit_incoming(
        &self,
        conn: &Arc<Connection>,
        remote_id: &NodeId,
        max_incoming: usize,
    ) -> Admission {
        let inner = self.inner.write();
        let others = || inner.values().filter(|c| !Arc::ptr_eq(c, conn));

        if others().any(|c| c.is_peer() && c.remote_id().as_ref() == Some(remote_id)) {
            return Admission::Duplicate;
        }
        let incoming = others()
            .filter(|c| !c.is_outbound() && c.is_peer())
            .count();
        if incoming >= max_incoming {
            return Admission::Full;
        }
        conn.promote();
        debug!(addr = %conn.addr(), peer = %remote_id.short(), "Admitted incoming peer");
        Admission::Admitted
    }

    /// Close every connection.
    pub fn close_all(&self) {
        for conn in self.all() {
            conn.close();
        }
    }
}
