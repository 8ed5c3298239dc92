//! Node configuration options.
//!
//! Tuning knobs for a conclave node. Everything has a default that
//! matches the wire behavior peers expect; options only shape local
//! policy (broadcast pacing, intake batching), never the protocol.

use std::time::Duration;

/// Node configuration options.
///
/// # Examples
///
/// ```
/// use conclave_core::options::NodeOptions;
/// use std::time::Duration;
///
/// let opts = NodeOptions::default()
///     .with_mod_broadcast_interval(Duration::from_millis(100))
///     .with_header("role", "mixer");
/// ```
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Minimum spacing between full-tree MOD broadcasts.
    ///
    /// - `None`: broadcast on every local change (default)
    /// - `Some(interval)`: changes inside the window mark the tree
    ///   dirty; the pending broadcast is flushed on a later loop
    ///   iteration once the interval has elapsed
    pub mod_broadcast_interval: Option<Duration>,

    /// Presence headers announced to peers, applied at construction.
    pub headers: Vec<(String, String)>,

    /// Maximum number of already-pending transport events drained per
    /// loop iteration after the blocking poll, keeping timers
    /// responsive under a message flood.
    pub drain_limit: usize,

    /// Copy values carried by incoming SIG messages into the local
    /// tree at their sink paths.
    ///
    /// - `false`: signals only reach the `on_peer_signaled` callback
    ///   (default)
    /// - `true`: each sink attribute is also updated through the normal
    ///   local-mutation pipeline
    pub apply_signals: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            mod_broadcast_interval: None,
            headers: Vec::new(),
            drain_limit: 64,
            apply_signals: false,
        }
    }
}

impl NodeOptions {
    /// Set the minimum spacing between MOD broadcasts.
    #[must_use]
    pub fn with_mod_broadcast_interval(mut self, interval: Duration) -> Self {
        self.mod_broadcast_interval = Some(interval);
        self
    }

    /// Add a presence header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the per-iteration event drain limit.
    #[must_use]
    pub fn with_drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit.max(1);
        self
    }

    /// Apply incoming SIG values to the local tree.
    #[must_use]
    pub fn with_apply_signals(mut self) -> Self {
        self.apply_signals = true;
        self
    }
}
