//! Subscription table (sorted prefix table).
//!
//! Directed edges from a local attribute path (the signal source) to a
//! sink path on a remote peer. Kept in a Vec sorted by source path:
//! subscribe/unsubscribe binary-search, the match hot-path is a
//! cache-friendly forward scan with early exit once a source can no
//! longer be a prefix of the changed path. Results come back in a
//! `SmallVec` and are deduplicated, because one peer may subscribe to
//! overlapping prefixes.

use smallvec::SmallVec;

use crate::path::Path;
use crate::transport::PeerId;

/// A subscriber edge: deliver to `sink` on `peer`.
pub type SinkRef = (PeerId, Path);

#[derive(Debug, Clone)]
struct SubEntry {
    source: Path,
    /// Inline up to 4 sinks without heap allocation (common low fanout).
    sinks: SmallVec<[SinkRef; 4]>,
}

/// Per-source subscription edges, sorted by source path.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subs: Vec<SubEntry>,
}

impl SubscriptionTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { subs: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Total number of `(source, peer, sink)` edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.iter().map(|s| s.sinks.len()).sum()
    }

    /// Idempotent insert of one edge.
    pub fn add(&mut self, source: Path, peer: PeerId, sink: Path) {
        match self.subs.binary_search_by(|s| s.source.cmp(&source)) {
            Ok(idx) => {
                let sinks = &mut self.subs[idx].sinks;
                if !sinks.contains(&(peer, sink.clone())) {
                    sinks.push((peer, sink));
                }
            }
            Err(idx) => {
                let mut sinks = SmallVec::<[SinkRef; 4]>::new();
                sinks.push((peer, sink));
                self.subs.insert(idx, SubEntry { source, sinks });
            }
        }
    }

    /// Idempotent removal of one edge.
    pub fn remove(&mut self, source: &Path, peer: PeerId, sink: &Path) {
        if let Ok(idx) = self.subs.binary_search_by(|s| s.source.cmp(source)) {
            let sinks = &mut self.subs[idx].sinks;
            if let Some(pos) = sinks.iter().position(|(p, s)| *p == peer && s == sink) {
                sinks.swap_remove(pos);
            }
            if sinks.is_empty() {
                self.subs.remove(idx);
            }
        }
    }

    /// Remove `peer` from every source (used on EXIT).
    pub fn remove_peer_everywhere(&mut self, peer: PeerId) {
        let mut i = 0usize;
        while i < self.subs.len() {
            let sinks = &mut self.subs[i].sinks;
            sinks.retain(|(p, _)| *p != peer);
            if sinks.is_empty() {
                self.subs.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Every edge whose source is the changed path or one of its
    /// ancestors. Subscribing to a container intentionally propagates
    /// all nested attribute updates.
    #[must_use]
    pub fn matches(&self, changed: &Path) -> SmallVec<[SinkRef; 8]> {
        let mut out: SmallVec<[SinkRef; 8]> = SmallVec::new();

        for sub in &self.subs {
            // A prefix sorts at or before its extensions; once a source
            // orders after the changed path it cannot be a prefix.
            if sub.source > *changed {
                break;
            }
            if sub.source.is_prefix_of(changed) {
                out.extend(sub.sinks.iter().cloned());
            }
        }

        if out.len() > 1 {
            out.sort_unstable();
            out.dedup();
        }

        out
    }
}
