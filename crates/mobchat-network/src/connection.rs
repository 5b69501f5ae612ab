//! State of a single peer link.
//!
//! The socket itself is owned by the connection task in the service; this
//! type is the shared half: an outbound frame queue, a close signal, and
//! the handshake/sync state guarded by a mutex.

use crate::dedup::SeenWindow;
use crate::handshake::Handshake;
use crate::message::MessageId;
use crate::routing::NodeId;
use crate::wire::Address;
use crate::{Message, NetworkError, NetworkResult, CONNECTION_SEEN_CAPACITY};
use mobchat_crypto::PublicKey;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Dialed or accepted, waiting for the handshake.
    AwaitingHandshake,
    /// Admitted as a full routing participant.
    Peer,
    /// Kept only to exchange routing state.
    SyncOnly,
    /// Closing or closed.
    Closed,
}

/// What the armed timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Handshake,
    Sync,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    kind: TimerKind,
    deadline: Instant,
}

struct ConnectionState {
    phase: Phase,
    remote_id: Option<NodeId>,
    remote_key: Option<PublicKey>,
    remote_address: Option<Address>,
    sent_get_routing: bool,
    seen: SeenWindow,
    timer: Option<Timer>,
}

/// Read-only view of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub addr: SocketAddr,
    pub outbound: bool,
    pub phase: Phase,
    pub remote_id: Option<NodeId>,
    pub remote_address: Option<Address>,
}

impl ConnectionInfo {
    pub fn is_peer(&self) -> bool {
        self.phase == Phase::Peer
    }
}

/// One physical link to a remote node.
pub struct Connection {
    addr: SocketAddr,
    outbound: bool,
    tx: mpsc::Sender<Message>,
    close: Notify,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(addr: SocketAddr, outbound: bool, tx: mpsc::Sender<Message>) -> Self {
        Self {
            addr,
            outbound,
            tx,
            close: Notify::new(),
            state: Mutex::new(ConnectionState {
                phase: Phase::AwaitingHandshake,
                remote_id: None,
                remote_key: None,
                remote_address: None,
                sent_get_routing: false,
                seen: SeenWindow::new(CONNECTION_SEEN_CAPACITY),
                timer: None,
            }),
        }
    }

    /// Remote socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Key in the connection set.
    pub fn key(&self) -> String {
        self.addr.to_string()
    }

    /// True if this side dialed.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn is_peer(&self) -> bool {
        self.phase() == Phase::Peer
    }

    pub fn handshake_done(&self) -> bool {
        !matches!(self.phase(), Phase::AwaitingHandshake)
    }

    pub fn remote_id(&self) -> Option<NodeId> {
        self.state.lock().remote_id
    }

    pub fn remote_key(&self) -> Option<PublicKey> {
        self.state.lock().remote_key.clone()
    }

    pub fn info(&self) -> ConnectionInfo {
        let state = self.state.lock();
        ConnectionInfo {
            addr: self.addr,
            outbound: self.outbound,
            phase: state.phase,
            remote_id: state.remote_id,
            remote_address: state.remote_address,
        }
    }

    /// Queue a frame for the writer. Never waits: a full queue drops the
    /// frame.
    pub fn send(&self, message: Message) -> NetworkResult<()> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(addr = %self.addr, "Send queue full, dropping frame");
                Err(NetworkError::Timeout("send queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(NetworkError::ConnectionClosed),
        }
    }

    /// Ask the connection task to shut the link.
    pub fn close(&self) {
        self.close.notify_one();
        debug!(addr = %self.addr, "Connection close requested");
    }

    /// Enter the closed phase, returning the phase it left.
    pub(crate) fn mark_closed(&self) -> Phase {
        let mut state = self.state.lock();
        state.timer = None;
        std::mem::replace(&mut state.phase, Phase::Closed)
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.close.notified().await
    }

    /// Record the remote identity from a verified handshake and leave the
    /// handshake phase as a sync-only link. Disarms the handshake timer.
    pub fn complete_handshake(&self, handshake: &Handshake) {
        let mut state = self.state.lock();
        state.remote_id = Some(handshake.id);
        state.remote_key = Some(handshake.public_key.clone());
        state.remote_address = Some(handshake.address);
        if state.phase == Phase::AwaitingHandshake {
            state.phase = Phase::SyncOnly;
        }
        if matches!(state.timer, Some(t) if t.kind == TimerKind::Handshake) {
            state.timer = None;
        }
    }

    /// Mark as a full peer. Only a sync-only link can be promoted.
    pub(crate) fn promote(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::SyncOnly {
            return false;
        }
        state.phase = Phase::Peer;
        state.timer = None;
        true
    }

    /// Record a message ID. Returns false if it was already seen here.
    pub fn record_seen(&self, id: MessageId) -> bool {
        self.state.lock().seen.insert(id)
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.state.lock().seen.contains(id)
    }

    pub fn set_sent_get_routing(&self) {
        self.state.lock().sent_get_routing = true;
    }

    /// Consume the outstanding GetRouting flag.
    pub fn take_sent_get_routing(&self) -> bool {
        std::mem::take(&mut self.state.lock().sent_get_routing)
    }

    /// Arm (or rearm) the timer.
    pub fn arm_timer(&self, kind: TimerKind, after: Duration) {
        self.state.lock().timer = Some(Timer {
            kind,
            deadline: Instant::now() + after,
        });
    }

    pub fn disarm_timer(&self) {
        self.state.lock().timer = None;
    }

    /// Current deadline, if a timer is armed.
    pub fn deadline(&self) -> Option<(TimerKind, Instant)> {
        self.state.lock().timer.map(|t| (t.kind, t.deadline))
    }

    /// Called when the deadline passes. Returns true if the link must be
    /// closed: the handshake never finished, or a sync-only link made no
    /// further progress.
    pub fn on_timer_fired(&self) -> bool {
        let mut state = self.state.lock();
        let Some(timer) = state.timer.take() else {
            return false;
        };
        if timer.deadline > Instant::now() {
            state.timer = Some(timer);
            return false;
        }
        match timer.kind {
            TimerKind::Handshake => state.phase == Phase::AwaitingHandshake,
            TimerKind::Sync => state.phase != Phase::Peer,
        }
    }
}
