//! Message dispatcher.
//!
//! The heart of the overlay: a single-owner state machine that consumes
//! typed transport events and decoded verbs, mutates the local tree and
//! the peer mirrors, maintains the subscription table, and emits
//! replies and fan-out.
//!
//! Concurrency model:
//! - All state lives on the event-loop thread; no locks.
//! - Verb handlers are total for well-formed transport events: they
//!   log and drop, never propagate failures into the loop.
//! - Fan-out triggered by a local mutation is emitted before the next
//!   transport event is read, so a change and its observable effects
//!   are causally ordered on the wire.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;
use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

use crate::error::{ConclaveError, Result};
use crate::options::NodeOptions;
use crate::path::{insert_at, Path};
use crate::registry::PeerRegistry;
use crate::subscription::SubscriptionTable;
use crate::transport::{PeerId, Transport, TransportEvent, CONTROL_GROUP};
use crate::tree::{Attribute, Container, MergeMode, Meta};
use crate::value::Value;
use crate::wire::Request;

/// A registered CALL target. Synchronous and fire-and-forget; long
/// work is the handler's responsibility to defer.
pub type CallHandler = Box<dyn FnMut(PeerId, &Json) + Send>;

/// Callback surface exposed to embedders.
///
/// Every method has a default body that logs and returns; implement
/// only what you need and hand the overlay a single handler object.
#[allow(unused_variables)]
pub trait NodeHandler: Send {
    fn on_peer_enter(
        &mut self,
        peer: PeerId,
        name: Option<&str>,
        headers: &std::collections::HashMap<String, String>,
    ) {
        debug!(peer = %peer, name = name.unwrap_or(""), "peer entered");
    }

    fn on_peer_exit(&mut self, peer: PeerId) {
        debug!(peer = %peer, "peer exited");
    }

    fn on_peer_join(&mut self, peer: PeerId, group: &str) {
        debug!(peer = %peer, group, "peer joined group");
    }

    fn on_peer_leave(&mut self, peer: PeerId, group: &str) {
        debug!(peer = %peer, group, "peer left group");
    }

    fn on_peer_whisper(&mut self, peer: PeerId, frames: &[Bytes]) {
        debug!(peer = %peer, frames = frames.len(), "peer whispered");
    }

    fn on_peer_shout(&mut self, peer: PeerId, group: &str, frames: &[Bytes]) {
        debug!(peer = %peer, group, frames = frames.len(), "peer shouted");
    }

    fn on_peer_modified(&mut self, peer: PeerId, payload: &Json) {
        debug!(peer = %peer, "peer tree modified");
    }

    fn on_peer_replied(&mut self, peer: PeerId, payload: &Json) {
        debug!(peer = %peer, "peer replied");
    }

    fn on_peer_signaled(&mut self, peer: PeerId, payload: &Json) {
        debug!(peer = %peer, "peer signaled");
    }

    /// Local tree changed; `peer` is the originator for remote writes,
    /// `None` for changes made by this node.
    fn on_modified(&mut self, payload: &Json, peer: Option<PeerId>) {
        match peer {
            Some(peer) => debug!(origin = %peer, "tree modified"),
            None => debug!(origin = "self", "tree modified"),
        }
    }
}

/// The no-op handler installed by default.
#[derive(Debug, Default)]
pub struct DefaultHandler;

impl NodeHandler for DefaultHandler {}

/// The verb/event state machine. Owns the transport, the local tree,
/// the peer mirrors and the subscription table.
pub struct Dispatcher<T: Transport> {
    transport: T,
    tree: Container,
    peers: PeerRegistry,
    subs: SubscriptionTable,
    handler: Box<dyn NodeHandler>,
    calls: HashMap<String, CallHandler>,
    options: NodeOptions,
    mod_dirty: bool,
    last_broadcast: Option<Instant>,
}

impl<T: Transport> Dispatcher<T> {
    /// Wrap a transport: joins the control group and applies presence
    /// headers.
    pub fn new(mut transport: T, options: NodeOptions) -> Result<Self> {
        transport.join(CONTROL_GROUP)?;
        for (key, value) in &options.headers {
            transport.set_header(key, value);
        }
        Ok(Self {
            transport,
            tree: Container::new(),
            peers: PeerRegistry::new(),
            subs: SubscriptionTable::new(),
            handler: Box::new(DefaultHandler),
            calls: HashMap::new(),
            options,
            mod_dirty: false,
            last_broadcast: None,
        })
    }

    /// Replace the callback surface.
    pub fn set_handler(&mut self, handler: Box<dyn NodeHandler>) {
        self.handler = handler;
    }

    /// Register a CALL target under `method`.
    pub fn register_call_handler(
        &mut self,
        method: impl Into<String>,
        handler: impl FnMut(PeerId, &Json) + Send + 'static,
    ) {
        self.calls.insert(method.into(), Box::new(handler));
    }

    #[must_use]
    pub fn uuid(&self) -> PeerId {
        self.transport.uuid()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.transport.name()
    }

    #[must_use]
    pub fn tree(&self) -> &Container {
        &self.tree
    }

    #[must_use]
    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subs
    }

    #[must_use]
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub(crate) fn poll_transport(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<Bytes>>> {
        self.transport.poll(timeout)
    }

    pub(crate) fn stop_transport(&mut self) -> Result<()> {
        self.transport.stop()
    }

    // ------------------------------------------------------------------
    // Transport event intake
    // ------------------------------------------------------------------

    /// Route one raw frame sequence from the transport.
    pub fn handle_frames(&mut self, frames: &[Bytes]) {
        match TransportEvent::parse(frames) {
            Ok(event) => self.handle_event(event),
            Err(e) => warn!(error = %e, "dropping unparseable transport event"),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Enter {
                peer,
                name,
                headers,
            } => {
                self.peers.on_enter(peer);
                if let Err(e) = self.send(peer, &Request::Get(None)) {
                    warn!(peer = %peer, error = %e, "capability request failed");
                }
                self.handler.on_peer_enter(peer, name.as_deref(), &headers);
            }
            TransportEvent::Exit { peer } => {
                self.handler.on_peer_exit(peer);
                self.peers.on_exit(peer);
                self.subs.remove_peer_everywhere(peer);
            }
            TransportEvent::Join { peer, group } => {
                self.peers.touch(peer);
                self.handler.on_peer_join(peer, &group);
            }
            TransportEvent::Leave { peer, group } => {
                self.peers.touch(peer);
                self.handler.on_peer_leave(peer, &group);
            }
            TransportEvent::Whisper { peer, frames } => {
                self.peers.touch(peer);
                self.handler.on_peer_whisper(peer, &frames);
                self.handle_payload(peer, &frames);
            }
            TransportEvent::Shout {
                peer,
                group,
                frames,
            } => {
                self.peers.touch(peer);
                self.handler.on_peer_shout(peer, &group, &frames);
                self.handle_payload(peer, &frames);
            }
        }
    }

    fn handle_payload(&mut self, peer: PeerId, frames: &[Bytes]) {
        let Some(payload) = frames.first() else {
            debug!(peer = %peer, "message without payload frame; dropped");
            return;
        };
        match Request::decode(payload) {
            Ok(requests) => {
                for request in requests {
                    self.handle_request(peer, request);
                }
            }
            Err(e) => warn!(peer = %peer, error = %e, "dropping undecodable message"),
        }
    }

    /// Apply one decoded verb from `peer`.
    pub fn handle_request(&mut self, peer: PeerId, request: Request) {
        match request {
            Request::Get(keys) => self.handle_get(peer, keys),
            Request::Set(patch) => self.handle_set(peer, patch),
            Request::Call { method, args } => self.handle_call(peer, method, args),
            Request::Sub { source, sink } => self.subs.add(source, peer, sink),
            Request::Unsub { source, sink } => self.subs.remove(&source, peer, &sink),
            Request::Rep(update) => {
                self.peers.apply_update(peer, &update);
                self.handler.on_peer_replied(peer, &update);
            }
            Request::Mod(update) => {
                self.peers.apply_update(peer, &update);
                self.handler.on_peer_modified(peer, &update);
            }
            Request::Sig {
                source,
                value,
                sinks,
            } => self.handle_sig(peer, &source, value, sinks),
        }
    }

    fn handle_get(&mut self, peer: PeerId, keys: Option<Vec<Path>>) {
        let reply = match keys {
            None => self.tree.to_json(),
            Some(paths) => {
                let mut map = Map::new();
                for path in &paths {
                    let subtree = self.tree.subtree_json(path).unwrap_or(Json::Null);
                    if path.is_root() {
                        if let Json::Object(whole) = subtree {
                            map.extend(whole);
                        }
                    } else {
                        insert_at(&mut map, path, subtree);
                    }
                }
                Json::Object(map)
            }
        };
        self.send_logged(peer, &Request::Rep(reply));
    }

    fn handle_set(&mut self, peer: PeerId, patch: Json) {
        let outcome = self.tree.merge(&patch, MergeMode::Write);
        if outcome.applied {
            self.local_modified(patch, Some(peer), &outcome.changed, None);
        }
    }

    fn handle_call(&mut self, peer: PeerId, method: String, args: Json) {
        if args.get("error").is_some() {
            // never answer an error report, it would ping-pong forever
            warn!(peer = %peer, method = %method, "peer reported a CALL error");
            return;
        }
        if let Some(handler) = self.calls.get_mut(&method) {
            handler(peer, &args);
        } else {
            debug!(peer = %peer, method = %method, "unknown CALL method");
            self.send_logged(
                peer,
                &Request::Call {
                    method,
                    args: json!({"error": "unknown method"}),
                },
            );
        }
    }

    fn handle_sig(&mut self, peer: PeerId, source: &Path, value: Json, sinks: Vec<Path>) {
        let payload = json!([
            source.to_json(),
            value,
            Json::Array(sinks.iter().map(Path::to_json).collect())
        ]);
        self.handler.on_peer_signaled(peer, &payload);
        if self.options.apply_signals {
            let value = &payload[1];
            for sink in &sinks {
                let coerced = self
                    .tree
                    .attribute(sink)
                    .and_then(|attr| Value::from_json(value, attr.type_hint()));
                match coerced {
                    Some(v) => {
                        if let Err(e) = self.set_value_tagged(sink, v, Some(peer)) {
                            debug!(sink = %sink, error = %e, "signal value not applied");
                        }
                    }
                    None => debug!(sink = %sink, "signal value does not fit sink; skipped"),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Local mutation API
    // ------------------------------------------------------------------

    /// Insert an attribute under `scope` and announce the change.
    pub fn register_attr(&mut self, scope: &Path, name: &str, attr: Attribute) {
        let mut obj = Map::new();
        obj.insert(name.to_owned(), attr.to_json());
        let payload = scope.nest(Json::Object(obj));
        let path = scope.child(name);
        self.tree.insert_attribute(scope, name, attr);
        self.local_modified(payload, None, &[path], None);
    }

    /// Create (or retype) `objects.<name>`; returns the scope path.
    pub fn ensure_object(&mut self, name: &str, object_type: &str) -> Path {
        self.tree.ensure_object(name, object_type)
    }

    /// Replace the whole capability tree and announce the change.
    /// Subscribers pick the new state up from the MOD broadcast.
    pub fn set_capability(&mut self, tree: Container) {
        self.tree = tree;
        let payload = self.tree.to_json();
        self.local_modified(payload, None, &[], None);
    }

    /// Apply typed root metadata and announce the change.
    pub fn set_meta(&mut self, meta: Meta) -> Result<()> {
        let payload = self.tree.set_meta(meta)?;
        self.local_modified(payload, None, &[], None);
        Ok(())
    }

    /// Overwrite an attribute value; announces and fans out only when
    /// the stored value actually changed.
    pub fn set_value(&mut self, path: &Path, value: impl Into<Value>) -> Result<()> {
        self.set_value_tagged(path, value.into(), None)
    }

    fn set_value_tagged(&mut self, path: &Path, value: Value, origin: Option<PeerId>) -> Result<()> {
        let changed = self.tree.set_attr_value(path, value)?;
        if changed {
            let stored = self
                .tree
                .attribute(path)
                .map_or(Json::Null, |a| a.value.to_json());
            let payload = path.nest(json!({ "value": stored }));
            self.local_modified(payload, origin, &[path.clone()], None);
        }
        Ok(())
    }

    /// Read an attribute value.
    #[must_use]
    pub fn value(&self, path: &Path) -> Option<&Value> {
        self.tree.attribute(path).map(|a| &a.value)
    }

    /// Overwrite an attribute value and fire a targeted SIG to its
    /// subscribers, whether or not the value changed.
    ///
    /// Distinct from the implicit MOD broadcast: SIG reaches only
    /// subscribers and carries the explicit value.
    pub fn emit_signal(&mut self, path: &Path, value: impl Into<Value>) -> Result<()> {
        self.tree.set_attr_value(path, value.into())?;
        let stored = self
            .tree
            .attribute(path)
            .ok_or_else(|| ConclaveError::PathNotFound(path.clone()))?
            .value
            .clone();
        let payload = path.nest(json!({ "value": stored.to_json() }));
        self.local_modified(payload, None, &[], Some((path, &stored)));
        Ok(())
    }

    /// Common tail of every local mutation: callback, MOD broadcast,
    /// then targeted fan-out (SET for ordinary mutations, SIG for
    /// explicit signal fires).
    fn local_modified(
        &mut self,
        payload: Json,
        origin: Option<PeerId>,
        changed: &[Path],
        signal: Option<(&Path, &Value)>,
    ) {
        self.handler.on_modified(&payload, origin);
        self.broadcast_mod();
        match signal {
            Some((source, value)) => self.fan_out_sig(source, value),
            None => self.fan_out_set(changed),
        }
    }

    fn fan_out_set(&mut self, changed: &[Path]) {
        if changed.is_empty() || self.subs.is_empty() {
            return;
        }
        let mut outgoing: Vec<(PeerId, Request)> = Vec::new();
        for path in changed {
            let Some(attr) = self.tree.attribute(path) else {
                continue;
            };
            if !attr.access.emit {
                continue;
            }
            let value = attr.value.to_json();
            for (peer, sink) in self.subs.matches(path) {
                let patch = sink.nest(json!({ "value": value.clone() }));
                outgoing.push((peer, Request::Set(patch)));
            }
        }
        for (peer, request) in outgoing {
            self.send_logged(peer, &request);
        }
    }

    fn fan_out_sig(&mut self, source: &Path, value: &Value) {
        let edges = self.subs.matches(source);
        if edges.is_empty() {
            return;
        }
        let mut per_peer: HashMap<PeerId, Vec<Path>> = HashMap::new();
        for (peer, sink) in edges {
            per_peer.entry(peer).or_default().push(sink);
        }
        let value = value.to_json();
        for (peer, sinks) in per_peer {
            let request = Request::Sig {
                source: source.clone(),
                value: value.clone(),
                sinks,
            };
            self.send_logged(peer, &request);
        }
    }

    fn broadcast_mod(&mut self) {
        if let (Some(interval), Some(last)) =
            (self.options.mod_broadcast_interval, self.last_broadcast)
        {
            if last.elapsed() < interval {
                self.mod_dirty = true;
                return;
            }
        }
        self.do_broadcast();
    }

    fn do_broadcast(&mut self) {
        let request = Request::Mod(self.tree.to_json());
        if let Err(e) = self.transport.shout(CONTROL_GROUP, request.encode()) {
            warn!(error = %e, "MOD broadcast failed");
        }
        self.last_broadcast = Some(Instant::now());
        self.mod_dirty = false;
    }

    /// Flush a rate-limited MOD broadcast once its window has passed.
    /// Called by the reactor at the end of each iteration.
    pub fn flush(&mut self) {
        if !self.mod_dirty {
            return;
        }
        let due = match (self.options.mod_broadcast_interval, self.last_broadcast) {
            (Some(interval), Some(last)) => last.elapsed() >= interval,
            _ => true,
        };
        if due {
            self.do_broadcast();
        }
    }

    // ------------------------------------------------------------------
    // Peer-directed requests
    // ------------------------------------------------------------------

    fn require_peer(&self, peer: PeerId) -> Result<()> {
        if self.peers.contains(peer) {
            Ok(())
        } else {
            Err(ConclaveError::UnknownPeer(peer))
        }
    }

    /// Request subtrees from a peer; `None` asks for everything.
    pub fn peer_get(&mut self, peer: PeerId, keys: Option<Vec<Path>>) -> Result<()> {
        self.require_peer(peer)?;
        self.send(peer, &Request::Get(keys))
    }

    /// Request a peer's whole capability tree.
    pub fn peer_get_capability(&mut self, peer: PeerId) -> Result<()> {
        self.peer_get(peer, None)
    }

    /// Merge a partial tree into a peer.
    pub fn peer_set(&mut self, peer: PeerId, data: Json) -> Result<()> {
        self.require_peer(peer)?;
        self.send(peer, &Request::Set(data))
    }

    /// Invoke a named handler on a peer.
    pub fn peer_call(&mut self, peer: PeerId, method: &str, args: Json) -> Result<()> {
        self.require_peer(peer)?;
        self.send(
            peer,
            &Request::Call {
                method: method.to_owned(),
                args,
            },
        )
    }

    /// Bind our `sink` to a peer's `source` signal.
    pub fn peer_subscribe(&mut self, peer: PeerId, source: Path, sink: Path) -> Result<()> {
        self.require_peer(peer)?;
        self.send(peer, &Request::Sub { source, sink })
    }

    /// Drop a subscription on a peer.
    pub fn peer_unsubscribe(&mut self, peer: PeerId, source: Path, sink: Path) -> Result<()> {
        self.require_peer(peer)?;
        self.send(peer, &Request::Unsub { source, sink })
    }

    fn send(&mut self, peer: PeerId, request: &Request) -> Result<()> {
        self.transport.whisper(peer, request.encode())
    }

    fn send_logged(&mut self, peer: PeerId, request: &Request) {
        if let Err(e) = self.send(peer, request) {
            warn!(peer = %peer, verb = request.verb(), error = %e, "send failed");
        }
    }
}
