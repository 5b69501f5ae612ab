//! Outstanding route requests awaiting a response.

use crate::message::MessageId;
use crate::routing::Route;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// Registry of request message IDs to their waiting callers.
#[derive(Default)]
pub struct PendingRequests {
    waiting: DashMap<MessageId, oneshot::Sender<Vec<Route>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request; the receiver resolves when a matching response
    /// arrives.
    pub fn register(&self, id: MessageId) -> oneshot::Receiver<Vec<Route>> {
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(id, tx);
        rx
    }

    /// Hand a response to its waiter. Returns false for an unmatched
    /// response, which the caller drops.
    pub fn complete(&self, id: &MessageId, routes: Vec<Route>) -> bool {
        match self.waiting.remove(id) {
            Some((_, tx)) => {
                if tx.send(routes).is_err() {
                    debug!("Route request waiter already gone");
                }
                true
            }
            None => false,
        }
    }

    /// Forget a request after its wait expired.
    pub fn cancel(&self, id: &MessageId) {
        self.waiting.remove(id);
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
