//! The node façade.
//!
//! Thin public surface over the dispatcher and the reactor: typed
//! attribute registration, scoped child objects, signal emission,
//! peer-directed requests, timers and the event loop.

use std::time::Duration;

use serde_json::Value as Json;

use conclave_core::dispatch::{Dispatcher, NodeHandler};
use conclave_core::error::Result;
use conclave_core::options::NodeOptions;
use conclave_core::path::Path;
use conclave_core::reactor::{Reactor, ShutdownHandle};
use conclave_core::timer::TimerHandle;
use conclave_core::transport::{PeerId, Transport};
use conclave_core::tree::{Attribute, Container, Meta};
use conclave_core::value::{Access, Value};

/// An overlay node: one identity on the transport, one capability
/// tree, one event loop.
///
/// Construction joins the control group; peers discover the node from
/// that moment on. Nothing is processed until the loop is driven with
/// [`Node::step`] or [`Node::run`].
pub struct Node<T: Transport> {
    reactor: Reactor<T>,
}

impl<T: Transport> Node<T> {
    /// Wrap a transport with default options.
    pub fn new(transport: T) -> Result<Self> {
        Self::with_options(transport, NodeOptions::default())
    }

    /// Wrap a transport with explicit options.
    pub fn with_options(transport: T, options: NodeOptions) -> Result<Self> {
        Ok(Self {
            reactor: Reactor::new(Dispatcher::new(transport, options)?),
        })
    }

    /// Install the callback surface. Defaults log and return.
    pub fn set_handler(&mut self, handler: impl NodeHandler + 'static) {
        self.reactor.dispatcher_mut().set_handler(Box::new(handler));
    }

    #[must_use]
    pub fn uuid(&self) -> PeerId {
        self.reactor.dispatcher().uuid()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.reactor.dispatcher().name()
    }

    /// The local capability tree.
    #[must_use]
    pub fn capability(&self) -> &Container {
        self.reactor.dispatcher().tree()
    }

    /// Replace the whole capability tree, overwriting everything
    /// registered so far.
    pub fn set_capability(&mut self, tree: Container) {
        self.reactor.dispatcher_mut().set_capability(tree);
    }

    /// Direct access to the dispatcher (the same view timer callbacks
    /// get).
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher<T> {
        self.reactor.dispatcher()
    }

    /// Mutable dispatcher access for advanced embedders.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<T> {
        self.reactor.dispatcher_mut()
    }

    // ------------------------------------------------------------------
    // Attribute registration (root scope)
    // ------------------------------------------------------------------

    /// Register an attribute at the root, replacing any prior node at
    /// that key. Use the [`Attribute`] builder for bounds:
    ///
    /// ```
    /// # use conclave::{Access, Attribute, InprocHub, Node};
    /// # let mut node = Node::new(InprocHub::new().attach("n")).unwrap();
    /// node.register("gain", Attribute::new(0.5, Access::rw()).with_min(0.0).with_max(1.0));
    /// ```
    pub fn register(&mut self, name: &str, attr: Attribute) {
        self.reactor
            .dispatcher_mut()
            .register_attr(&Path::root(), name, attr);
    }

    /// Register an `int` attribute at the root.
    pub fn register_int(&mut self, name: &str, value: i64, access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Register a `float` attribute at the root.
    pub fn register_float(&mut self, name: &str, value: f64, access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Register a `percent` attribute at the root.
    pub fn register_percent(&mut self, name: &str, value: f64, access: Access) {
        self.register(name, Attribute::new(Value::Percent(value), access));
    }

    /// Register a `bool` attribute at the root.
    pub fn register_bool(&mut self, name: &str, value: bool, access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Register a `string` attribute at the root.
    pub fn register_string(&mut self, name: &str, value: &str, access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Register a `vec2f` attribute at the root.
    pub fn register_vec2f(&mut self, name: &str, value: [f64; 2], access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Register a `vec3f` attribute at the root.
    pub fn register_vec3f(&mut self, name: &str, value: [f64; 3], access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Register a `vec4f` attribute at the root.
    pub fn register_vec4f(&mut self, name: &str, value: [f64; 4], access: Access) {
        self.register(name, Attribute::new(value, access));
    }

    /// Open (or retype) the child object `objects.<name>` and return a
    /// scoped registration handle. The root scope is never implicitly
    /// mutated; drop the handle to go back to registering at the root.
    pub fn object(&mut self, name: &str, object_type: &str) -> ObjectScope<'_, T> {
        let path = self
            .reactor
            .dispatcher_mut()
            .ensure_object(name, object_type);
        ObjectScope {
            dispatcher: self.reactor.dispatcher_mut(),
            path,
        }
    }

    // ------------------------------------------------------------------
    // Node metadata
    // ------------------------------------------------------------------

    /// Set the node's announced `_name`.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.set_meta(Meta::Name(name.to_owned()))
    }

    /// Set the node's `_location` hint.
    pub fn set_location(&mut self, location: [f64; 3]) -> Result<()> {
        self.set_meta(Meta::Location(location))
    }

    /// Set the node's `_orientation` hint.
    pub fn set_orientation(&mut self, orientation: [f64; 3]) -> Result<()> {
        self.set_meta(Meta::Orientation(orientation))
    }

    /// Set the node's `_scale` hint.
    pub fn set_scale(&mut self, scale: [f64; 3]) -> Result<()> {
        self.set_meta(Meta::Scale(scale))
    }

    /// Set the node's `_matrix` transform.
    pub fn set_matrix(&mut self, matrix: [[f64; 4]; 4]) -> Result<()> {
        self.set_meta(Meta::Matrix(matrix))
    }

    /// Set one typed root metadata entry.
    pub fn set_meta(&mut self, meta: Meta) -> Result<()> {
        self.reactor.dispatcher_mut().set_meta(meta)
    }

    // ------------------------------------------------------------------
    // Values and signals
    // ------------------------------------------------------------------

    /// Read an attribute value.
    #[must_use]
    pub fn value(&self, path: impl Into<Path>) -> Option<Value> {
        self.reactor.dispatcher().value(&path.into()).cloned()
    }

    /// Overwrite an attribute value through the normal mutation
    /// pipeline (callback, MOD broadcast, SET fan-out on change).
    pub fn set_value(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> Result<()> {
        self.reactor.dispatcher_mut().set_value(&path.into(), value)
    }

    /// Overwrite an attribute value and fire a targeted SIG to its
    /// subscribers.
    pub fn emit_signal(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> Result<()> {
        self.reactor
            .dispatcher_mut()
            .emit_signal(&path.into(), value)
    }

    /// Register a synchronous CALL target.
    pub fn register_call_handler(
        &mut self,
        method: impl Into<String>,
        handler: impl FnMut(PeerId, &Json) + Send + 'static,
    ) {
        self.reactor
            .dispatcher_mut()
            .register_call_handler(method, handler);
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    /// Identities of every currently known peer.
    #[must_use]
    pub fn get_peers(&self) -> Vec<PeerId> {
        self.reactor.dispatcher().peers().ids().collect()
    }

    /// Snapshot of a peer's mirrored capability tree.
    #[must_use]
    pub fn peer_tree(&self, peer: PeerId) -> Option<Container> {
        self.reactor
            .dispatcher()
            .peers()
            .get(peer)
            .map(|entry| entry.capability.clone())
    }

    /// Ask a peer for named subtrees (`None` for everything).
    pub fn peer_get(&mut self, peer: PeerId, keys: Option<Vec<Path>>) -> Result<()> {
        self.reactor.dispatcher_mut().peer_get(peer, keys)
    }

    /// Ask a peer for its whole capability tree.
    pub fn peer_get_capability(&mut self, peer: PeerId) -> Result<()> {
        self.reactor.dispatcher_mut().peer_get_capability(peer)
    }

    /// Merge a partial tree into a peer.
    pub fn peer_set(&mut self, peer: PeerId, data: Json) -> Result<()> {
        self.reactor.dispatcher_mut().peer_set(peer, data)
    }

    /// Invoke a named handler on a peer.
    pub fn peer_call(&mut self, peer: PeerId, method: &str, args: Json) -> Result<()> {
        self.reactor.dispatcher_mut().peer_call(peer, method, args)
    }

    /// Bind our `sink` to a peer's `source` signal.
    pub fn peer_subscribe(
        &mut self,
        peer: PeerId,
        source: impl Into<Path>,
        sink: impl Into<Path>,
    ) -> Result<()> {
        self.reactor
            .dispatcher_mut()
            .peer_subscribe(peer, source.into(), sink.into())
    }

    /// Drop a subscription on a peer.
    pub fn peer_unsubscribe(
        &mut self,
        peer: PeerId,
        source: impl Into<Path>,
        sink: impl Into<Path>,
    ) -> Result<()> {
        self.reactor
            .dispatcher_mut()
            .peer_unsubscribe(peer, source.into(), sink.into())
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Process pending events and due timers once, waiting at most
    /// `timeout` (`None` blocks, `Some(Duration::ZERO)` never does).
    pub fn step(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reactor.step(timeout)
    }

    /// Drive the loop until [`Node::stop`] or a [`ShutdownHandle`]
    /// fires, or the transport fails.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reactor.run(timeout)
    }

    /// Request shutdown and release loop resources.
    pub fn stop(&mut self) {
        self.reactor.stop();
    }

    /// A cloneable handle that stops a running loop from any thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Run `callback` every `interval` on the loop thread. The handle
    /// cancels from any thread; timers die with the node.
    pub fn schedule_repeating(
        &mut self,
        interval: Duration,
        callback: impl FnMut(&mut Dispatcher<T>) + Send + 'static,
    ) -> TimerHandle {
        self.reactor.schedule_repeating(interval, callback)
    }
}

/// Scoped registration handle for one `objects.<name>` child.
///
/// Attributes registered through the scope nest inside the object;
/// several scopes can be opened one after another without any hidden
/// current-scope state on the node.
pub struct ObjectScope<'a, T: Transport> {
    dispatcher: &'a mut Dispatcher<T>,
    path: Path,
}

impl<T: Transport> ObjectScope<'_, T> {
    /// The tree path of this object.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register an attribute inside this object.
    pub fn register(&mut self, name: &str, attr: Attribute) -> &mut Self {
        self.dispatcher.register_attr(&self.path, name, attr);
        self
    }

    /// Register an `int` attribute inside this object.
    pub fn register_int(&mut self, name: &str, value: i64, access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }

    /// Register a `float` attribute inside this object.
    pub fn register_float(&mut self, name: &str, value: f64, access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }

    /// Register a `percent` attribute inside this object.
    pub fn register_percent(&mut self, name: &str, value: f64, access: Access) -> &mut Self {
        self.register(name, Attribute::new(Value::Percent(value), access))
    }

    /// Register a `bool` attribute inside this object.
    pub fn register_bool(&mut self, name: &str, value: bool, access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }

    /// Register a `string` attribute inside this object.
    pub fn register_string(&mut self, name: &str, value: &str, access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }

    /// Register a `vec2f` attribute inside this object.
    pub fn register_vec2f(&mut self, name: &str, value: [f64; 2], access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }

    /// Register a `vec3f` attribute inside this object.
    pub fn register_vec3f(&mut self, name: &str, value: [f64; 3], access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }

    /// Register a `vec4f` attribute inside this object.
    pub fn register_vec4f(&mut self, name: &str, value: [f64; 4], access: Access) -> &mut Self {
        self.register(name, Attribute::new(value, access))
    }
}
