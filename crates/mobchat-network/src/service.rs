//! Network service managing overlay connections.
//!
//! This module provides:
//! - TCP listener for incoming connections and the dialer for outgoing ones
//! - The per-connection task (framing, dispatch, timers, teardown)
//! - Reconnection of lost outgoing peers
//! - The command loop behind [`NetworkHandle`]

use crate::connection::{Connection, Phase, TimerKind};
use crate::connections::ConnectionSet;
use crate::dedup::SeenWindow;
use crate::dispatcher::{dispatch, Flow};
use crate::local::LocalNode;
use crate::message::{Broadcast, MessageId, Payload, PeerDisconnected, Relay};
use crate::pending::PendingRequests;
use crate::routing::{NodeId, Route, RoutingTable};
use crate::wire::Address;
use crate::{
    ConnectionInfo, FrameCodec, Message, NetworkError, NetworkResult, DEFAULT_PORT,
    GLOBAL_SEEN_CAPACITY, MAX_MESSAGE_SIZE,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use futures::SinkExt;
use mobchat_crypto::{sign_and_encrypt, PrivateKey};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the event channel.
const EVENT_CHANNEL_SIZE: usize = 1000;

/// Capacity of the command channel.
const COMMAND_CHANNEL_SIZE: usize = 100;

/// Protocol timers.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Time allowed for the handshake after a connection opens.
    pub handshake: Duration,
    /// Lifetime of a non-peer link without routing progress.
    pub sync: Duration,
    /// Wait for a route response.
    pub request: Duration,
    /// Reconnect delay unit; attempt `n` waits `n` units.
    pub reconnect_base: Duration,
    pub reconnect_attempts: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            sync: Duration::from_secs(30),
            request: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(10),
            reconnect_attempts: 10,
        }
    }
}

/// How the node describes its own address to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advertise {
    /// Server-capable: `0.0.0.0` with the listen port.
    Public,
    /// A concrete address with the listen port.
    Private(Ipv4Addr),
}

impl Advertise {
    pub fn address(&self, port: u16) -> Address {
        match self {
            Advertise::Public => Address::server(port),
            Advertise::Private(ip) => Address::new(*ip, port),
        }
    }
}

/// Network service configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Listen address. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    pub advertise: Advertise,
    /// Addresses dialed at startup.
    pub bootstrap: Vec<SocketAddr>,
    /// Incoming peer slots.
    pub max_incoming: usize,
    /// Outgoing connection limit for discovery.
    pub max_outgoing: usize,
    pub max_message_size: usize,
    /// Per-connection send queue length.
    pub send_queue: usize,
    pub timeouts: TimeoutConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            advertise: Advertise::Public,
            bootstrap: Vec::new(),
            max_incoming: 5,
            max_outgoing: 5,
            max_message_size: MAX_MESSAGE_SIZE,
            send_queue: 100,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// How an application message reached this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Sent over a direct peer link.
    Direct,
    /// Forwarded through the overlay.
    Relayed,
    /// Flooded to every node.
    Broadcast,
}

/// Events emitted by the network service.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A connection became a peer.
    PeerConnected { id: NodeId, addr: SocketAddr },
    /// A peer connection closed.
    PeerDisconnected { id: NodeId },
    /// Application data arrived.
    MessageReceived {
        from: NodeId,
        kind: MessageKind,
        data: Bytes,
    },
    /// Failed to connect to a peer.
    ConnectionFailed { addr: SocketAddr, error: String },
    /// The local routing table agrees with, or was merged from, a remote one.
    RoutingSynced,
}

/// Commands that can be sent to the network service.
#[derive(Debug)]
pub enum NetworkCommand {
    /// Dial an address.
    Connect { addr: SocketAddr },
    /// Encrypted message to a directly connected peer.
    SendMessage {
        node: NodeId,
        data: Bytes,
        reply: oneshot::Sender<NetworkResult<()>>,
    },
    /// Signed broadcast to every node.
    Broadcast {
        data: Bytes,
        reply: oneshot::Sender<NetworkResult<usize>>,
    },
    /// Encrypted message forwarded through the overlay.
    Relay {
        node: NodeId,
        data: Bytes,
        reply: oneshot::Sender<NetworkResult<()>>,
    },
    /// Ask peers for routes to a node.
    FindRoute {
        node: NodeId,
        reply: oneshot::Sender<NetworkResult<Vec<Route>>>,
    },
    /// Shutdown the service.
    Shutdown,
}

/// State shared by the service, its connection tasks and its handles.
pub(crate) struct NetworkContext {
    pub(crate) config: NetworkConfig,
    pub(crate) local: LocalNode,
    pub(crate) connections: ConnectionSet,
    pub(crate) routing: RoutingTable,
    pub(crate) seen: Mutex<SeenWindow>,
    pub(crate) pending: PendingRequests,
    events: mpsc::Sender<NetworkEvent>,
    initial_sync: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl NetworkContext {
    pub(crate) fn emit(&self, event: NetworkEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "Dropping network event");
        }
    }

    pub(crate) fn is_synced(&self) -> bool {
        self.initial_sync.load(Ordering::Acquire)
    }

    pub(crate) fn mark_synced(&self) {
        if !self.initial_sync.swap(true, Ordering::AcqRel) {
            info!(nodes = self.routing.len(), "Initial routing sync complete");
        }
        self.emit(NetworkEvent::RoutingSynced);
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Check a message ID against the global window and the connection's
    /// own, recording it in both. Returns false for a duplicate.
    pub(crate) fn record_seen(&self, conn: &Connection, id: MessageId) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(&id) || conn.has_seen(&id) {
            return false;
        }
        seen.insert(id);
        conn.record_seen(id);
        true
    }

    /// Send a locally created gossip message to every peer except `except`,
    /// remembering it so echoes are ignored.
    pub(crate) fn flood(&self, message: &Message, except: Option<&Connection>) -> usize {
        self.seen.lock().insert(message.id());
        self.connections.broadcast(message, except)
    }

    fn send_direct(&self, node: &NodeId, data: Bytes) -> NetworkResult<()> {
        let conn = self
            .connections
            .peer_for(node)
            .ok_or_else(|| NetworkError::NotConnected(node.short()))?;
        let key = conn
            .remote_key()
            .ok_or_else(|| NetworkError::NotConnected(node.short()))?;
        let body = Payload::Generic(data).encode();
        let sealed = sign_and_encrypt(&self.local.key, &key, &body)?;
        conn.send(Message::new(sealed, true))
    }

    fn broadcast(&self, data: &[u8]) -> NetworkResult<usize> {
        let notice = Broadcast::sign(&self.local.key, data)?;
        Ok(self.flood(&Message::plain(&Payload::Broadcast(notice)), None))
    }

    fn relay(&self, target: &NodeId, data: Bytes) -> NetworkResult<()> {
        let key = self
            .routing
            .public_key(target)
            .ok_or_else(|| NetworkError::UnknownNode(target.short()))?;
        let body = Payload::Generic(data).encode();
        let inner = Message::new(sign_and_encrypt(&self.local.key, &key, &body)?, true);
        self.seen.lock().insert(inner.id());

        let message = Message::plain(&Payload::Relay(Relay {
            target: *target,
            origin: self.local.id,
            hops: 0,
            inner,
        }));
        if let Some(peer) = self.connections.peer_for(target) {
            return peer.send(message);
        }
        match self.flood(&message, None) {
            0 => Err(NetworkError::NotConnected("no peers".to_string())),
            _ => Ok(()),
        }
    }

    async fn find_route(&self, target: NodeId) -> NetworkResult<Vec<Route>> {
        let message = Message::plain(&Payload::GetRoute { target });
        let id = message.id();
        let rx = self.pending.register(id);
        if self.connections.broadcast(&message, None) == 0 {
            self.pending.cancel(&id);
            return Err(NetworkError::NotConnected("no peers".to_string()));
        }

        match tokio::time::timeout(self.config.timeouts.request, rx).await {
            Ok(Ok(routes)) => Ok(routes),
            Ok(Err(_)) => Err(NetworkError::ServiceStopped),
            Err(_) => {
                self.pending.cancel(&id);
                Err(NetworkError::Timeout(format!(
                    "route request for {}",
                    target.short()
                )))
            }
        }
    }

    /// True when `addr` is this node's own listener.
    fn is_own_addr(&self, addr: &SocketAddr, listen: &SocketAddr) -> bool {
        if addr.port() != listen.port() {
            return false;
        }
        let ip = addr.ip();
        ip == listen.ip()
            || ip.is_loopback()
            || ip.is_unspecified()
            || (listen.ip().is_unspecified() && ip == IpAddr::V4(self.local.address.ip))
    }
}

/// Cloneable handle to a running network service.
#[derive(Clone)]
pub struct NetworkHandle {
    commands: mpsc::Sender<NetworkCommand>,
    ctx: Arc<NetworkContext>,
}

impl NetworkHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<NetworkResult<T>>) -> NetworkCommand,
    ) -> NetworkResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| NetworkError::ServiceStopped)?;
        rx.await.map_err(|_| NetworkError::ServiceStopped)?
    }

    /// Dial a peer.
    pub async fn connect(&self, addr: SocketAddr) -> NetworkResult<()> {
        self.commands
            .send(NetworkCommand::Connect { addr })
            .await
            .map_err(|_| NetworkError::ServiceStopped)
    }

    /// Send data to a directly connected peer, signed and encrypted.
    pub async fn send(&self, node: NodeId, data: impl Into<Bytes>) -> NetworkResult<()> {
        let data = data.into();
        self.request(|reply| NetworkCommand::SendMessage { node, data, reply })
            .await
    }

    /// Flood signed data to every node. Returns the number of peers it was
    /// handed to.
    pub async fn broadcast(&self, data: impl Into<Bytes>) -> NetworkResult<usize> {
        let data = data.into();
        self.request(|reply| NetworkCommand::Broadcast { data, reply })
            .await
    }

    /// Send data to any known node through the overlay.
    pub async fn relay(&self, node: NodeId, data: impl Into<Bytes>) -> NetworkResult<()> {
        let data = data.into();
        self.request(|reply| NetworkCommand::Relay { node, data, reply })
            .await
    }

    /// Ask peers for the shortest routes to `node`.
    pub async fn find_route(&self, node: NodeId) -> NetworkResult<Vec<Route>> {
        self.request(|reply| NetworkCommand::FindRoute { node, reply })
            .await
    }

    /// Stop the service.
    pub async fn shutdown(&self) {
        if self.commands.send(NetworkCommand::Shutdown).await.is_err() {
            debug!("Network service already stopped");
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.ctx.routing
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.ctx.connections.snapshot()
    }

    pub fn peer_count(&self) -> usize {
        self.ctx.connections.count_peers()
    }

    pub fn local_id(&self) -> NodeId {
        self.ctx.local.id
    }

    pub fn local_address(&self) -> Address {
        self.ctx.local.address
    }
}

/// Network service: owns the listener and the command loop.
pub struct NetworkService {
    ctx: Arc<NetworkContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
    command_rx: mpsc::Receiver<NetworkCommand>,
}

impl NetworkService {
    /// Bind the listener and build the service. The advertised address
    /// uses the port actually bound, and the local node is registered in
    /// its own routing table.
    pub async fn bind(
        config: NetworkConfig,
        key: PrivateKey,
    ) -> NetworkResult<(Self, NetworkHandle, mpsc::Receiver<NetworkEvent>)> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let local = LocalNode::new(key, config.advertise.address(local_addr.port()));
        info!(
            addr = %local_addr,
            id = %local.id,
            advertised = %local.address,
            "Network service listening"
        );

        let routing = RoutingTable::new();
        routing.add_node(local.node());

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (shutdown, _) = watch::channel(false);

        let ctx = Arc::new(NetworkContext {
            config,
            local,
            connections: ConnectionSet::new(),
            routing,
            seen: Mutex::new(SeenWindow::new(GLOBAL_SEEN_CAPACITY)),
            pending: PendingRequests::new(),
            events: event_tx,
            initial_sync: AtomicBool::new(false),
            shutdown,
        });

        let handle = NetworkHandle {
            commands: command_tx,
            ctx: ctx.clone(),
        };
        let service = Self {
            ctx,
            listener,
            local_addr,
            command_rx,
        };
        Ok((service, handle, event_rx))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the network service until shutdown.
    pub async fn run(self) -> NetworkResult<()> {
        let NetworkService {
            ctx,
            listener,
            local_addr,
            mut command_rx,
        } = self;

        for addr in ctx.config.bootstrap.iter().copied() {
            if ctx.is_own_addr(&addr, &local_addr) {
                debug!(addr = %addr, "Skipping own address in bootstrap list");
                continue;
            }
            info!(addr = %addr, "Dialing bootstrap peer");
            spawn_dial(ctx.clone(), addr, None);
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => handle_incoming(&ctx, stream, addr),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(NetworkCommand::Shutdown) | None => break,
                        Some(cmd) => handle_command(&ctx, cmd),
                    }
                }
            }
        }

        info!("Network service shutting down");
        ctx.shutdown.send_replace(true);
        ctx.connections.close_all();
        Ok(())
    }
}

fn handle_incoming(ctx: &Arc<NetworkContext>, stream: TcpStream, addr: SocketAddr) {
    debug!(addr = %addr, "Incoming connection");
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_connection(ctx, stream, addr, false).await {
            warn!(addr = %addr, error = %e, "Connection failed");
        }
    });
}

fn handle_command(ctx: &Arc<NetworkContext>, cmd: NetworkCommand) {
    match cmd {
        NetworkCommand::Connect { addr } => {
            info!(addr = %addr, "Connecting to peer");
            spawn_dial(ctx.clone(), addr, None);
        }
        NetworkCommand::SendMessage { node, data, reply } => {
            let _ = reply.send(ctx.send_direct(&node, data));
        }
        NetworkCommand::Broadcast { data, reply } => {
            let _ = reply.send(ctx.broadcast(&data));
        }
        NetworkCommand::Relay { node, data, reply } => {
            let _ = reply.send(ctx.relay(&node, data));
        }
        NetworkCommand::FindRoute { node, reply } => {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _ = reply.send(ctx.find_route(node).await);
            });
        }
        NetworkCommand::Shutdown => {}
    }
}

/// Dial `addr` on a new task. `target` is the routing-table node the dial
/// was claimed for; its pending mark is cleared when the dial ends.
pub(crate) fn spawn_dial(ctx: Arc<NetworkContext>, addr: SocketAddr, target: Option<NodeId>) {
    tokio::spawn(async move {
        if let Err(e) = dial(ctx.clone(), addr).await {
            warn!(addr = %addr, error = %e, "Outgoing connection failed");
            ctx.emit(NetworkEvent::ConnectionFailed {
                addr,
                error: e.to_string(),
            });
        }
        if let Some(id) = target {
            ctx.routing.clear_pending(&id);
        }
    });
}

async fn dial(ctx: Arc<NetworkContext>, addr: SocketAddr) -> NetworkResult<()> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| NetworkError::ConnectFailed {
            addr,
            reason: e.to_string(),
        })?;
    handle_connection(ctx, stream, addr, true).await
}

/// Retry a lost outgoing peer with linear backoff. Gives up on shutdown,
/// once the address is connected again, or after the configured attempts.
async fn reconnect(ctx: Arc<NetworkContext>, addr: SocketAddr, id: NodeId) {
    let timeouts = ctx.config.timeouts.clone();
    let mut shutdown = ctx.shutdown.subscribe();

    for attempt in 1..=timeouts.reconnect_attempts {
        let delay = timeouts.reconnect_base * attempt;
        debug!(addr = %addr, attempt, ?delay, "Scheduling reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
        if ctx.is_shutting_down() {
            return;
        }
        if ctx.connections.contains_addr(&addr) || ctx.connections.peer_for(&id).is_some() {
            debug!(addr = %addr, "Peer already reconnected");
            return;
        }

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(addr = %addr, attempt, "Reconnected to peer");
                if let Err(e) = handle_connection(ctx.clone(), stream, addr, true).await {
                    warn!(addr = %addr, error = %e, "Reconnected link failed");
                }
                return;
            }
            Err(e) => warn!(addr = %addr, attempt, error = %e, "Reconnect attempt failed"),
        }
    }

    warn!(addr = %addr, "Giving up on peer");
    ctx.emit(NetworkEvent::ConnectionFailed {
        addr,
        error: format!(
            "gave up after {} reconnect attempts",
            timeouts.reconnect_attempts
        ),
    });
}

async fn timer(deadline: Option<(TimerKind, Instant)>) {
    match deadline {
        Some((_, at)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Serve one connection (both incoming and outgoing) until it closes.
async fn handle_connection(
    ctx: Arc<NetworkContext>,
    stream: TcpStream,
    addr: SocketAddr,
    outbound: bool,
) -> NetworkResult<()> {
    let mut shutdown = ctx.shutdown.subscribe();
    if *shutdown.borrow() {
        return Ok(());
    }

    let codec = FrameCodec::with_max_size(ctx.config.max_message_size);
    let (mut sink, mut stream) = Framed::new(stream, codec).split();
    let (tx, mut rx) = mpsc::channel::<Message>(ctx.config.send_queue);
    let conn = Arc::new(Connection::new(addr, outbound, tx));
    ctx.connections.add(conn.clone());
    conn.arm_timer(TimerKind::Handshake, ctx.config.timeouts.handshake);

    if outbound {
        let hello = ctx.local.handshake(ctx.local.address);
        if let Err(e) = conn.send(Message::plain(&Payload::Handshake(hello))) {
            warn!(addr = %addr, error = %e, "Failed to queue handshake");
        }
    }

    let result = loop {
        let deadline = conn.deadline();
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(bytes)) => match Message::decode(bytes) {
                        Ok(message) => match dispatch(&ctx, &conn, message) {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break Ok(()),
                            Err(e) => break Err(e),
                        },
                        Err(e) => debug!(addr = %addr, error = %e, "Dropping malformed frame"),
                    },
                    Some(Err(e)) => break Err(e),
                    None => {
                        debug!(addr = %addr, "Connection closed by peer");
                        break Ok(());
                    }
                }
            }

            Some(message) = rx.recv() => {
                trace!(addr = %addr, len = message.encoded_len(), "Sending frame");
                if let Err(e) = sink.send(message).await {
                    break Err(e);
                }
            }

            _ = conn.closed() => break Ok(()),

            _ = timer(deadline) => {
                if conn.on_timer_fired() {
                    info!(addr = %addr, phase = ?conn.phase(), "Connection timed out");
                    break Ok(());
                }
            }

            _ = shutdown.changed() => break Ok(()),
        }
    };

    teardown(&ctx, &conn);
    result
}

/// Remove a finished connection. A lost peer has its edge dropped, the loss
/// gossiped, and, if we dialed it, a reconnect scheduled.
fn teardown(ctx: &Arc<NetworkContext>, conn: &Arc<Connection>) {
    let previous = conn.mark_closed();
    ctx.connections.remove(conn);

    let Some(remote) = conn.remote_id() else {
        return;
    };
    ctx.routing.clear_pending(&remote);
    if previous != Phase::Peer {
        debug!(addr = %conn.addr(), "Closed non-peer connection");
        return;
    }

    info!(addr = %conn.addr(), peer = %remote.short(), "Peer disconnected");
    ctx.routing.remove_edge(&ctx.local.id, &remote);
    match PeerDisconnected::sign(&ctx.local.key, &remote) {
        Ok(notice) => {
            ctx.flood(&Message::plain(&Payload::PeerDisconnected(notice)), None);
        }
        Err(e) => warn!(error = %e, "Failed to sign peer disconnected notice"),
    }
    ctx.emit(NetworkEvent::PeerDisconnected { id: remote });

    if conn.is_outbound() && !ctx.is_shutting_down() {
        tokio::spawn(reconnect(ctx.clone(), conn.addr(), remote));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::KEYS;

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_network_config_default() {
        let config = NetworkConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_incoming, 5);
        assert_eq!(config.max_outgoing, 5);
        assert_eq!(config.timeouts.handshake, Duration::from_secs(10));
        assert_eq!(config.timeouts.reconnect_attempts, 10);
    }

    #[test]
    fn test_advertise() {
        assert_eq!(Advertise::Public.address(9999), Address::server(9999));
        let private = Advertise::Private(Ipv4Addr::new(10, 0, 0, 1)).address(1);
        assert!(!private.is_server());
    }

    #[tokio::test]
    async fn test_bind_registers_self() {
        let (service, handle, _events) = NetworkService::bind(test_config(), KEYS[0].clone())
            .await
            .unwrap();
        assert_ne!(service.local_addr().port(), 0);
        assert_eq!(handle.local_address().port, service.local_addr().port());
        assert!(handle.routing().contains(&handle.local_id()));
        assert_eq!(handle.routing().len(), 1);
    }

    #[tokio::test]
    async fn test_own_address_detection() {
        let (service, handle, _events) = NetworkService::bind(test_config(), KEYS[1].clone())
            .await
            .unwrap();
        let listen = service.local_addr();
        let ctx = &handle.ctx;
        assert!(ctx.is_own_addr(&listen, &listen));
        let other: SocketAddr = format!("127.0.0.1:{}", listen.port() + 1).parse().unwrap();
        assert!(!ctx.is_own_addr(&other, &listen));
    }

    #[tokio::test]
    async fn test_requests_fail_without_peers() {
        let (service, handle, _events) = NetworkService::bind(test_config(), KEYS[2].clone())
            .await
            .unwrap();
        let task = tokio::spawn(service.run());

        let target = NodeId::from(KEYS[3].public_key());
        assert!(matches!(
            handle.send(target, &b"hi"[..]).await,
            Err(NetworkError::NotConnected(_))
        ));
        assert!(matches!(
            handle.relay(target, &b"hi"[..]).await,
            Err(NetworkError::UnknownNode(_))
        ));
        assert!(matches!(
            handle.find_route(target).await,
            Err(NetworkError::NotConnected(_))
        ));
        assert_eq!(handle.broadcast(&b"hi"[..]).await.unwrap(), 0);

        handle.shutdown().await;
        task.await.unwrap().unwrap();
        assert!(matches!(
            handle.find_route(target).await,
            Err(NetworkError::ServiceStopped)
        ));
    }
}
