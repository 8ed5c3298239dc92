//! Conclave error types.
//!
//! One error enum for everything that can go wrong between the wire and
//! the capability tree. Verb handlers never let these escape into the
//! event loop; the loop only reacts to `is_fatal()` errors.

use std::io;
use thiserror::Error;

use crate::path::Path;
use crate::transport::PeerId;

/// Main error type for conclave operations
#[derive(Error, Debug)]
pub enum ConclaveError {
    /// IO error surfaced by a transport implementation
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Frame payload was not valid JSON
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Message object carried no recognized verb
    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    /// Verb payload had the wrong shape
    #[error("malformed {verb} payload: {detail}")]
    MalformedPayload { verb: &'static str, detail: String },

    /// Outbound request addressed a peer that is not in the registry
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// No node at the addressed path
    #[error("no node at path: {0}")]
    PathNotFound(Path),

    /// A value did not conform to the attribute's type hint
    #[error("type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: Path, expected: &'static str },

    /// Rejected node metadata (e.g. an empty `_name`)
    #[error("invalid metadata: {0}")]
    InvalidMeta(String),

    /// Transport failure; tears the event loop down
    #[error("transport error: {0}")]
    Transport(String),

    /// A transport-internal channel was closed
    #[error("channel send error")]
    ChannelSend,
}

/// Result type alias for conclave operations
pub type Result<T> = std::result::Result<T, ConclaveError>;

impl ConclaveError {
    /// Create a malformed-payload error for a verb
    pub fn malformed(verb: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            verb,
            detail: detail.into(),
        }
    }

    /// Create a transport error with a message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Fatal errors shut the event loop down; everything else is
    /// logged and dropped by the handler that saw it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Transport(_) | Self::ChannelSend
        )
    }

    /// Check if this is a decode-layer error (bad JSON or unknown verb)
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::UnknownVerb(_) | Self::MalformedPayload { .. }
        )
    }
}
