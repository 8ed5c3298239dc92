//! Peer registry: last-known capability mirrors.
//!
//! One entry per live peer, created on ENTER and deleted on EXIT. The
//! mirror is eventually consistent: it reflects the last REP/MOD the
//! peer sent, nothing more.

use std::time::Instant;

use hashbrown::HashMap;

use crate::transport::PeerId;
use crate::tree::{Container, MergeMode};

/// A peer's mirrored capability tree plus liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub capability: Container,
    pub last_seen: Instant,
}

impl PeerEntry {
    fn new() -> Self {
        Self {
            capability: Container::new(),
            last_seen: Instant::now(),
        }
    }
}

/// Mapping from peer identity to mirror state.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty entry on ENTER; returns `false` when the peer
    /// was already known.
    pub fn on_enter(&mut self, peer: PeerId) -> bool {
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.last_seen = Instant::now();
            return false;
        }
        self.peers.insert(peer, PeerEntry::new());
        true
    }

    /// Drop the entry on EXIT.
    pub fn on_exit(&mut self, peer: PeerId) -> Option<PeerEntry> {
        self.peers.remove(&peer)
    }

    /// Refresh `last_seen` for a known peer.
    pub fn touch(&mut self, peer: PeerId) {
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.last_seen = Instant::now();
        }
    }

    /// Merge a REP/MOD payload into the peer's mirror, creating the
    /// entry when the peer raced past its ENTER.
    pub fn apply_update(&mut self, peer: PeerId, update: &serde_json::Value) {
        let entry = self.peers.entry(peer).or_insert_with(PeerEntry::new);
        entry.capability.merge(update, MergeMode::Mirror);
        entry.last_seen = Instant::now();
    }

    #[must_use]
    pub fn get(&self, peer: PeerId) -> Option<&PeerEntry> {
        self.peers.get(&peer)
    }

    #[must_use]
    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enter_update_exit() {
        let mut registry = PeerRegistry::new();
        let peer = PeerId::random();

        assert!(registry.on_enter(peer));
        assert!(!registry.on_enter(peer));
        assert!(registry.get(peer).unwrap().capability.is_empty());

        registry.apply_update(
            peer,
            &json!({"a": {"value": 7, "typeHint": "int", "access": "r"}}),
        );
        assert!(!registry.get(peer).unwrap().capability.is_empty());

        assert!(registry.on_exit(peer).is_some());
        assert!(registry.get(peer).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn update_creates_missing_entry() {
        let mut registry = PeerRegistry::new();
        let peer = PeerId::random();
        registry.apply_update(peer, &json!({"_name": "late"}));
        assert!(registry.contains(peer));
    }
}
