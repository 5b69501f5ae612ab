//! Test harness for integration tests.
//!
//! Provides in-process nodes bound to loopback ports with shortened timers,
//! a raw protocol client for driving a node frame by frame, and polling
//! helpers.

use futures::{SinkExt, StreamExt};
use mobchat_crypto::PrivateKey;
use mobchat_network::{
    Address, FrameCodec, Handshake, Message, NetworkConfig, NetworkEvent, NetworkHandle,
    NetworkResult, NetworkService, NodeId, Payload, TimeoutConfig,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Default wait for conditions in tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// Timers short enough for tests.
pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        handshake: Duration::from_millis(500),
        sync: Duration::from_secs(2),
        request: Duration::from_secs(3),
        reconnect_base: Duration::from_millis(100),
        reconnect_attempts: 2,
    }
}

/// Network config on an ephemeral loopback port.
pub fn test_config() -> NetworkConfig {
    NetworkConfig {
        listen_addr: "127.0.0.1:0".parse().expect("loopback address"),
        timeouts: fast_timeouts(),
        ..Default::default()
    }
}

/// A running node.
pub struct TestNode {
    pub handle: NetworkHandle,
    pub addr: SocketAddr,
    pub events: mpsc::Receiver<NetworkEvent>,
    task: JoinHandle<NetworkResult<()>>,
}

impl TestNode {
    /// Start a node with the default test config.
    pub async fn start(key: PrivateKey) -> Self {
        Self::start_with(key, |_| {}).await
    }

    /// Start a node after adjusting its config.
    pub async fn start_with(key: PrivateKey, configure: impl FnOnce(&mut NetworkConfig)) -> Self {
        let mut config = test_config();
        configure(&mut config);
        let (service, handle, events) = NetworkService::bind(config, key)
            .await
            .expect("Failed to bind test node");
        let addr = service.local_addr();
        let task = tokio::spawn(service.run());
        Self {
            handle,
            addr,
            events,
            task,
        }
    }

    pub fn id(&self) -> NodeId {
        self.handle.local_id()
    }

    /// Dial another test node.
    pub async fn connect_to(&self, other: &TestNode) {
        self.handle
            .connect(other.addr)
            .await
            .expect("Failed to queue connect");
    }

    /// Wait for the first event satisfying `pred`, skipping others.
    pub async fn wait_for_event(
        &mut self,
        pred: impl Fn(&NetworkEvent) -> bool,
    ) -> Option<NetworkEvent> {
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            while let Some(event) = events.recv().await {
                if pred(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Collect events that satisfy `pred` for `window`.
    pub async fn count_events(
        &mut self,
        window: Duration,
        pred: impl Fn(&NetworkEvent) -> bool,
    ) -> usize {
        let deadline = tokio::time::Instant::now() + window;
        let mut count = 0;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            if pred(&event) {
                count += 1;
            }
        }
        count
    }

    /// Stop the node and wait for its service loop to end.
    pub async fn stop(self) {
        self.handle.shutdown().await;
        let _ = self.task.await;
    }
}

/// Poll `condition` until it holds or `WAIT` passes.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Connect `a` to hub `b` and wait until both see the peer link.
pub async fn link(a: &TestNode, b: &TestNode) {
    a.connect_to(b).await;
    let (ida, idb) = (a.id(), b.id());
    let linked = wait_until(|| {
        a.handle
            .connections()
            .iter()
            .any(|c| c.is_peer() && c.remote_id == Some(idb))
            && b
                .handle
                .connections()
                .iter()
                .any(|c| c.is_peer() && c.remote_id == Some(ida))
    })
    .await;
    assert!(linked, "peer link did not form");
}

/// Speaks the wire protocol directly, for checking exact frames.
pub struct RawClient {
    pub key: PrivateKey,
    framed: Framed<TcpStream, FrameCodec>,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr, key: PrivateKey) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect raw client");
        Self {
            key,
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from(self.key.public_key())
    }

    pub async fn send(&mut self, message: Message) {
        self.framed
            .send(message)
            .await
            .expect("Failed to send raw frame");
    }

    /// Next message, or `None` on close or timeout.
    pub async fn recv(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(Message::decode(frame).expect("valid message")),
            _ => None,
        }
    }

    /// Next message whose body decodes to a payload accepted by `pred`.
    pub async fn recv_payload(&mut self, pred: impl Fn(&Payload) -> bool) -> Option<Payload> {
        self.recv_payload_within(WAIT, pred).await
    }

    /// As [`RawClient::recv_payload`], giving up after `wait` in total.
    pub async fn recv_payload_within(
        &mut self,
        wait: Duration,
        pred: impl Fn(&Payload) -> bool,
    ) -> Option<Payload> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let message = self.recv(left).await?;
            if let Ok(payload) = Payload::decode(&message.body) {
                if pred(&payload) {
                    return Some(payload);
                }
            }
        }
    }

    /// Send a handshake advertising `address` and return the response.
    pub async fn handshake(&mut self, address: Address) -> Handshake {
        let hello = Handshake::new(self.key.public_key().clone(), address);
        self.send(Message::plain(&Payload::Handshake(hello))).await;
        match self
            .recv_payload(|p| matches!(p, Payload::HandshakeResponse(_)))
            .await
        {
            Some(Payload::HandshakeResponse(response)) => response,
            _ => panic!("no handshake response"),
        }
    }

    /// True once the remote side has closed the stream.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}
