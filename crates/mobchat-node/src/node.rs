//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use mobchat_network::discovery::resolve_checkin;
use mobchat_network::{NetworkEvent, NetworkHandle, NetworkService};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Time allowed to resolve each checkin entry.
const CHECKIN_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// A bound, not yet running node.
pub struct Node {
    service: NetworkService,
    handle: NetworkHandle,
    events: mpsc::Receiver<NetworkEvent>,
}

impl Node {
    /// Load the key, resolve bootstrap peers and bind the listener. Any
    /// failure here is fatal.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let key = config.load_or_generate_key()?;
        let bootstrap = resolve_checkin(&config.checkin, config.port, CHECKIN_RESOLVE_TIMEOUT).await;
        info!(count = bootstrap.len(), "Resolved checkin peers");

        let (service, handle, events) = NetworkService::bind(config.network_config(bootstrap), key)
            .await
            .with_context(|| format!("Failed to listen on port {}", config.port))?;

        info!(
            id = %handle.local_id(),
            address = %handle.local_address(),
            "Node identity"
        );
        Ok(Self {
            service,
            handle,
            events,
        })
    }

    pub fn handle(&self) -> NetworkHandle {
        self.handle.clone()
    }

    /// Serve until the network service stops.
    pub async fn run(self) -> Result<()> {
        let Node {
            service,
            handle,
            events,
        } = self;
        tokio::spawn(log_events(events, handle));
        service.run().await?;
        Ok(())
    }
}

async fn log_events(mut events: mpsc::Receiver<NetworkEvent>, handle: NetworkHandle) {
    while let Some(event) = events.recv().await {
        match event {
            NetworkEvent::PeerConnected { id, addr } => {
                info!(peer = %id.short(), addr = %addr, peers = handle.peer_count(), "Peer connected");
            }
            NetworkEvent::PeerDisconnected { id } => {
                info!(peer = %id.short(), peers = handle.peer_count(), "Peer disconnected");
            }
            NetworkEvent::MessageReceived { from, kind, data } => {
                info!(
                    from = %from.short(),
                    ?kind,
                    text = %String::from_utf8_lossy(&data),
                    "Message received"
                );
            }
            NetworkEvent::ConnectionFailed { addr, error } => {
                warn!(addr = %addr, error = %error, "Connection failed");
            }
            NetworkEvent::RoutingSynced => {
                info!(nodes = handle.routing().len(), "Routing table in sync");
            }
        }
    }
}
