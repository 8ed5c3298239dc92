//! # Conclave
//!
//! A peer-to-peer control overlay for orchestrated installations:
//! autonomous nodes on a LAN discover each other, publish a structured
//! *capability* tree describing their controllable attributes, and
//! exchange read/write/call/subscribe messages to inspect and steer
//! those capabilities at runtime.
//!
//! ## Architecture
//!
//! Conclave is layered:
//!
//! - **`conclave-core`**: capability tree, wire codec, dispatcher,
//!   event loop, transport contract
//! - **`conclave`**: public API surface (this crate)
//!
//! The overlay does not own a socket. It consumes any group-membership
//! transport implementing [`Transport`] (ENTER/EXIT presence, groups,
//! whisper/shout). An in-process mesh transport ships in the box for
//! tests and single-process deployments.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conclave::{Access, InprocHub, Node};
//! use std::time::Duration;
//!
//! fn main() -> conclave::Result<()> {
//!     let hub = InprocHub::named("studio");
//!     let mut node = Node::new(hub.attach("mixer"))?;
//!     node.set_name("mixer")?;
//!
//!     // publish controllable state
//!     node.register_float("level", 0.0, Access::rwe());
//!     node.register_bool("muted", false, Access::rw());
//!
//!     // nested child object
//!     node.object("deck", "Player")
//!         .register_string("clip", "", Access::rw())
//!         .register_percent("progress", 0.0, Access::re());
//!
//!     // drive the loop; peers can now GET/SET/SUB against this node
//!     node.run(Some(Duration::from_millis(500)))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Consistency model
//!
//! Peer mirrors are eventually consistent: every node rebroadcasts its
//! tree on change and answers GET with a REP snapshot. Subscriptions
//! live on the emitting node; a subscriber receives targeted SET or
//! SIG messages for the sources it bound to.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Re-export core types
pub use bytes::Bytes;
pub use conclave_core::dispatch::{DefaultHandler, Dispatcher, NodeHandler};
pub use conclave_core::error::{ConclaveError, Result};
pub use conclave_core::inproc::{InprocHub, InprocTransport};
pub use conclave_core::options::NodeOptions;
pub use conclave_core::path::Path;
pub use conclave_core::reactor::ShutdownHandle;
pub use conclave_core::timer::TimerHandle;
pub use conclave_core::transport::{PeerId, Transport, TransportEvent, CONTROL_GROUP};
pub use conclave_core::tree::{Attribute, Container, Meta, TreeNode};
pub use conclave_core::value::{Access, TypeHint, Value};
pub use conclave_core::wire::Request;
pub use serde_json::{json, Value as Json};

mod node;
pub use node::{Node, ObjectScope};

/// Development helpers (examples/tests)
pub mod dev_tracing;
