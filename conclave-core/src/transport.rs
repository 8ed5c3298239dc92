//! Group-membership transport contract.
//!
//! The overlay does not own a socket; it consumes an abstract transport
//! that provides peer identity, presence events, group membership and
//! the whisper/shout emitters. Events arrive as ordered byte-frame
//! sequences with a leading UTF-8 event-type token; [`TransportEvent`]
//! is the typed form the dispatcher works with.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConclaveError, Result};

/// The control group every node joins at construction.
pub const CONTROL_GROUP: &str = "ZOCP";

/// Opaque 128-bit peer identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Fresh random identity (v4).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a 16-byte frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        Uuid::from_slice(frame)
            .map(Self)
            .map_err(|e| ConclaveError::malformed("event", format!("bad peer id: {e}")))
    }

    /// The identity as a 16-byte frame.
    #[must_use]
    pub fn to_frame(self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A typed presence or message event from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Enter {
        peer: PeerId,
        name: Option<String>,
        headers: HashMap<String, String>,
    },
    Exit {
        peer: PeerId,
    },
    Join {
        peer: PeerId,
        group: String,
    },
    Leave {
        peer: PeerId,
        group: String,
    },
    Whisper {
        peer: PeerId,
        frames: Vec<Bytes>,
    },
    Shout {
        peer: PeerId,
        group: String,
        frames: Vec<Bytes>,
    },
}

impl TransportEvent {
    /// The peer this event concerns.
    #[must_use]
    pub const fn peer(&self) -> PeerId {
        match self {
            Self::Enter { peer, .. }
            | Self::Exit { peer }
            | Self::Join { peer, .. }
            | Self::Leave { peer, .. }
            | Self::Whisper { peer, .. }
            | Self::Shout { peer, .. } => *peer,
        }
    }

    /// Parse a raw frame sequence.
    ///
    /// Layout: `[token, peer-uuid, ...]` with a group frame after the
    /// uuid for JOIN/LEAVE/SHOUT, an optional name and JSON headers
    /// frame for ENTER, and payload frames for WHISPER/SHOUT.
    pub fn parse(frames: &[Bytes]) -> Result<Self> {
        let (token, rest) = frames
            .split_first()
            .ok_or_else(|| ConclaveError::malformed("event", "empty frame sequence"))?;
        let token = std::str::from_utf8(token)
            .map_err(|_| ConclaveError::malformed("event", "event token is not UTF-8"))?;
        let (peer_frame, rest) = rest
            .split_first()
            .ok_or_else(|| ConclaveError::malformed("event", "missing peer id frame"))?;
        let peer = PeerId::from_frame(peer_frame)?;
        match token {
            "ENTER" => {
                let name = rest
                    .first()
                    .and_then(|f| std::str::from_utf8(f).ok())
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned);
                let headers = rest
                    .get(1)
                    .and_then(|f| serde_json::from_slice(f).ok())
                    .unwrap_or_default();
                Ok(Self::Enter {
                    peer,
                    name,
                    headers,
                })
            }
            "EXIT" => Ok(Self::Exit { peer }),
            "JOIN" | "LEAVE" => {
                let group = group_frame(token, rest)?;
                Ok(if token == "JOIN" {
                    Self::Join { peer, group }
                } else {
                    Self::Leave { peer, group }
                })
            }
            "WHISPER" => Ok(Self::Whisper {
                peer,
                frames: rest.to_vec(),
            }),
            "SHOUT" => {
                let group = group_frame(token, rest)?;
                Ok(Self::Shout {
                    peer,
                    group,
                    frames: rest[1..].to_vec(),
                })
            }
            other => Err(ConclaveError::malformed(
                "event",
                format!("unknown event token: {other}"),
            )),
        }
    }

    /// Serialize back into the raw frame layout `parse` accepts.
    #[must_use]
    pub fn to_frames(&self) -> Vec<Bytes> {
        match self {
            Self::Enter {
                peer,
                name,
                headers,
            } => vec![
                Bytes::from_static(b"ENTER"),
                peer.to_frame(),
                Bytes::from(name.clone().unwrap_or_default()),
                Bytes::from(serde_json::to_vec(headers).unwrap_or_else(|_| b"{}".to_vec())),
            ],
            Self::Exit { peer } => vec![Bytes::from_static(b"EXIT"), peer.to_frame()],
            Self::Join { peer, group } => vec![
                Bytes::from_static(b"JOIN"),
                peer.to_frame(),
                Bytes::from(group.clone()),
            ],
            Self::Leave { peer, group } => vec![
                Bytes::from_static(b"LEAVE"),
                peer.to_frame(),
                Bytes::from(group.clone()),
            ],
            Self::Whisper { peer, frames } => {
                let mut out = vec![Bytes::from_static(b"WHISPER"), peer.to_frame()];
                out.extend(frames.iter().cloned());
                out
            }
            Self::Shout {
                peer,
                group,
                frames,
            } => {
                let mut out = vec![
                    Bytes::from_static(b"SHOUT"),
                    peer.to_frame(),
                    Bytes::from(group.clone()),
                ];
                out.extend(frames.iter().cloned());
                out
            }
        }
    }
}

fn group_frame(token: &str, rest: &[Bytes]) -> Result<String> {
    let frame = rest.first().ok_or_else(|| {
        ConclaveError::malformed("event", format!("{token} missing group frame"))
    })?;
    std::str::from_utf8(frame)
        .map(str::to_owned)
        .map_err(|_| ConclaveError::malformed("event", "group name is not UTF-8"))
}

/// The group-membership transport the overlay runs on.
///
/// `poll` hands back one raw frame sequence at a time; `None` means the
/// timeout elapsed with nothing pending. `Some(Duration::ZERO)` polls
/// without blocking, `None` blocks until an event arrives.
pub trait Transport {
    /// This node's 128-bit identity.
    fn uuid(&self) -> PeerId;

    /// Node name announced to peers.
    fn name(&self) -> String;

    /// Rename this node (affects future presence announcements).
    fn set_name(&mut self, name: &str);

    /// Attach a key/value header to presence announcements.
    fn set_header(&mut self, key: &str, value: &str);

    /// Join a named group.
    fn join(&mut self, group: &str) -> Result<()>;

    /// Leave a named group.
    fn leave(&mut self, group: &str) -> Result<()>;

    /// Point-to-point send.
    fn whisper(&mut self, peer: PeerId, payload: Bytes) -> Result<()>;

    /// Group broadcast.
    fn shout(&mut self, group: &str, payload: Bytes) -> Result<()>;

    /// Wait up to `timeout` for the next raw event.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<Bytes>>>;

    /// Announce departure and release transport resources. Idempotent.
    fn stop(&mut self) -> Result<()>;
}
