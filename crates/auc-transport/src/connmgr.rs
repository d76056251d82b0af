//! Building blocks shared by host implementations: connection protection
//! and notification fan-out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::peer::PeerId;
use crate::traits::{ConnManager, Notifiee, SubscriptionId};

/// Protection tags per peer.
#[derive(Default)]
pub struct ProtectionTable {
    tags: DashMap<PeerId, HashSet<String>>,
}

impl ProtectionTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnManager for ProtectionTable {
    fn protect(&self, peer: &PeerId, tag: &str) {
        self.tags
            .entry(peer.clone())
            .or_default()
            .insert(tag.to_string());
    }

    fn unprotect(&self, peer: &PeerId, tag: &str) -> bool {
        let still_protected = match self.tags.get_mut(peer) {
            Some(mut tags) => {
                tags.remove(tag);
                !tags.is_empty()
            }
            None => return false,
        };
        if !still_protected {
            self.tags.remove_if(peer, |_, tags| tags.is_empty());
        }
        still_protected
    }

    fn is_protected(&self, peer: &PeerId, tag: Option<&str>) -> bool {
        match (self.tags.get(peer), tag) {
            (Some(tags), Some(tag)) => tags.contains(tag),
            (Some(tags), None) => !tags.is_empty(),
            (None, _) => false,
        }
    }
}

/// Registered connection observers.
#[derive(Default)]
pub struct NotifierSet {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn Notifiee>)>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, notifiee: Arc<dyn Notifiee>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, notifiee));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Snapshot first so observers can (un)subscribe from inside a callback.
    fn snapshot(&self) -> Vec<Arc<dyn Notifiee>> {
        self.subscribers
            .lock()
            .iter()
            .map(|(_, n)| Arc::clone(n))
            .collect()
    }

    pub fn emit_connected(&self, peer: &PeerId) {
        for n in self.snapshot() {
            n.connected(peer);
        }
    }

    pub fn emit_disconnected(&self, peer: &PeerId) {
        for n in self.snapshot() {
            n.disconnected(peer);
        }
    }
}
