//! Conclave Core
//!
//! This crate contains the transport-agnostic building blocks of the
//! control overlay:
//! - Capability tree: typed attribute tree with access metadata (`tree`, `value`)
//! - Wire codec for the eight control verbs (`wire`)
//! - Peer registry of mirrored capability trees (`registry`)
//! - Subscription table (sorted prefix table) (`subscription`)
//! - Verb/event dispatcher (`dispatch`)
//! - Cooperative event loop + timer wheel (`reactor`, `timer`)
//! - Transport contract + in-process mesh transport (`transport`, `inproc`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

pub mod dispatch;
pub mod error;
pub mod inproc;
pub mod options;
pub mod path;
pub mod reactor;
pub mod registry;
pub mod subscription;
pub mod timer;
pub mod transport;
pub mod tree;
pub mod value;
pub mod wire;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::dispatch::{DefaultHandler, Dispatcher, NodeHandler};
    pub use crate::error::{ConclaveError, Result};
    pub use crate::inproc::{InprocHub, InprocTransport};
    pub use crate::options::NodeOptions;
    pub use crate::path::Path;
    pub use crate::reactor::{Reactor, ShutdownHandle};
    pub use crate::timer::TimerHandle;
    pub use crate::transport::{PeerId, Transport, TransportEvent, CONTROL_GROUP};
    pub use crate::tree::{Attribute, Container, Meta, MergeMode, TreeNode};
    pub use crate::value::{Access, TypeHint, Value};
    pub use crate::wire::Request;
}
