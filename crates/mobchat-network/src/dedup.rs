//! Bounded windows of recently seen message IDs.
//!
//! Every delivered message ID is remembered until it falls out of the
//! window. A frame whose ID is already present is dropped, which is what
//! stops flood gossip from looping.

use crate::message::MessageId;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Window of message IDs. IDs are only ever inserted once, so the cache's
/// least-recently-used order is insertion order.
pub struct SeenWindow {
    ids: LruCache<MessageId, ()>,
}

impl SeenWindow {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ids: LruCache::new(capacity),
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Record an ID, evicting the oldest once full. Returns false if the ID
    /// was already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.put(id, ());
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ids.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> MessageId {
        let mut out = [0u8; 32];
        out[..4].copy_from_slice(&n.to_be_bytes());
        out
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut window = SeenWindow::new(4);
        assert!(window.insert(id(1)));
        assert!(!window.insert(id(1)));
        assert!(window.contains(&id(1)));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_oldest_evicted() {
        let mut window = SeenWindow::new(3);
        for n in 0..5 {
            window.insert(id(n));
        }
        assert_eq!(window.len(), 3);
        assert!(!window.contains(&id(0)));
        assert!(!window.contains(&id(1)));
        assert!(window.contains(&id(4)));

        // An evicted ID is accepted again.
        assert!(window.insert(id(0)));
    }

    #[test]
    fn test_lookup_does_not_refresh() {
        let mut window = SeenWindow::new(2);
        window.insert(id(1));
        window.insert(id(2));
        assert!(window.contains(&id(1)));
        assert!(!window.insert(id(1)));

        // id(1) is still the oldest entry.
        window.insert(id(3));
        assert!(!window.contains(&id(1)));
        assert!(window.contains(&id(2)));
    }

    #[test]
    fn test_zero_capacity_raised() {
        let mut window = SeenWindow::new(0);
        assert_eq!(window.capacity(), 1);
        assert!(window.insert(id(7)));
        assert!(!window.insert(id(7)));
    }

    #[test]
    fn test_connection_window_capacity() {
        let mut window = SeenWindow::new(crate::CONNECTION_SEEN_CAPACITY);
        for n in 0..150 {
            window.insert(id(n));
        }
        assert_eq!(window.len(), 100);
        assert!(window.contains(&id(149)));
        assert!(!window.contains(&id(49)));
        assert!(window.contains(&id(50)));
    }
}
