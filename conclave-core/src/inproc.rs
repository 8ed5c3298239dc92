//! In-process transport for nodes living in the same process.
//!
//! A hub is a tiny mesh: every attached node gets a flume inbox, and
//! the hub synthesizes the same ENTER/EXIT/JOIN/LEAVE presence events a
//! LAN transport would deliver, routing WHISPER point-to-point and
//! SHOUT to group members. No serialization, network, or syscall
//! overhead; used by the test suites, the examples, and single-process
//! deployments.
//!
//! Hubs can be shared by handle (`InprocHub::new` + `clone`) or by name
//! through a process-global registry (`InprocHub::named`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, Sender};
use hashbrown::{HashMap as PeerMap, HashSet};
use parking_lot::Mutex;

use crate::error::{ConclaveError, Result};
use crate::transport::{PeerId, Transport, TransportEvent};

/// Global registry of named hubs
static HUB_REGISTRY: once_cell::sync::Lazy<DashMap<String, InprocHub>> =
    once_cell::sync::Lazy::new(DashMap::new);

#[derive(Debug)]
struct Member {
    tx: Sender<Vec<Bytes>>,
    name: String,
    headers: HashMap<String, String>,
    groups: HashSet<String>,
}

#[derive(Debug, Default)]
struct HubState {
    members: PeerMap<PeerId, Member>,
}

impl HubState {
    /// Deliver an event to every member except `from`.
    fn announce(&self, from: PeerId, event: &TransportEvent) {
        let frames = event.to_frames();
        for (id, member) in &self.members {
            if *id != from {
                let _ = member.tx.send(frames.clone());
            }
        }
    }
}

/// A shared in-process mesh of nodes.
#[derive(Debug, Clone, Default)]
pub struct InprocHub {
    state: Arc<Mutex<HubState>>,
}

impl InprocHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or create) a process-global hub by name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        HUB_REGISTRY
            .entry(name.to_owned())
            .or_insert_with(Self::new)
            .clone()
    }

    /// Attach a node with presence headers; announces ENTER to the
    /// mesh and replays existing members' presence to the newcomer.
    #[must_use]
    pub fn attach_with_headers(
        &self,
        name: &str,
        headers: HashMap<String, String>,
    ) -> InprocTransport {
        let id = PeerId::random();
        let (tx, rx) = flume::unbounded();
        let mut state = self.state.lock();

        // replay existing presence to the newcomer
        for (peer, member) in &state.members {
            let _ = tx.send(
                TransportEvent::Enter {
                    peer: *peer,
                    name: Some(member.name.clone()),
                    headers: member.headers.clone(),
                }
                .to_frames(),
            );
            for group in &member.groups {
                let _ = tx.send(
                    TransportEvent::Join {
                        peer: *peer,
                        group: group.clone(),
                    }
                    .to_frames(),
                );
            }
        }

        state.announce(
            id,
            &TransportEvent::Enter {
                peer: id,
                name: Some(name.to_owned()),
                headers: headers.clone(),
            },
        );
        state.members.insert(
            id,
            Member {
                tx,
                name: name.to_owned(),
                headers,
                groups: HashSet::new(),
            },
        );

        InprocTransport {
            hub: self.clone(),
            id,
            rx,
            stopped: false,
        }
    }

    /// Attach a node without presence headers.
    #[must_use]
    pub fn attach(&self, name: &str) -> InprocTransport {
        self.attach_with_headers(name, HashMap::new())
    }

    /// Number of attached nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().members.is_empty()
    }
}

/// One node's endpoint on an [`InprocHub`].
#[derive(Debug)]
pub struct InprocTransport {
    hub: InprocHub,
    id: PeerId,
    rx: Receiver<Vec<Bytes>>,
    stopped: bool,
}

impl Transport for InprocTransport {
    fn uuid(&self) -> PeerId {
        self.id
    }

    fn name(&self) -> String {
        self.hub
            .state
            .lock()
            .members
            .get(&self.id)
            .map(|m| m.name.clone())
            .unwrap_or_default()
    }

    fn set_name(&mut self, name: &str) {
        if let Some(member) = self.hub.state.lock().members.get_mut(&self.id) {
            member.name = name.to_owned();
        }
    }

    fn set_header(&mut self, key: &str, value: &str) {
        // visible to members that attach after this call
        if let Some(member) = self.hub.state.lock().members.get_mut(&self.id) {
            member.headers.insert(key.to_owned(), value.to_owned());
        }
    }

    fn join(&mut self, group: &str) -> Result<()> {
        let mut state = self.hub.state.lock();
        let newly = match state.members.get_mut(&self.id) {
            Some(member) => member.groups.insert(group.to_owned()),
            None => return Err(ConclaveError::transport("transport is detached")),
        };
        if newly {
            state.announce(
                self.id,
                &TransportEvent::Join {
                    peer: self.id,
                    group: group.to_owned(),
                },
            );
        }
        Ok(())
    }

    fn leave(&mut self, group: &str) -> Result<()> {
        let mut state = self.hub.state.lock();
        let was_member = match state.members.get_mut(&self.id) {
            Some(member) => member.groups.remove(group),
            None => return Err(ConclaveError::transport("transport is detached")),
        };
        if was_member {
            state.announce(
                self.id,
                &TransportEvent::Leave {
                    peer: self.id,
                    group: group.to_owned(),
                },
            );
        }
        Ok(())
    }

    fn whisper(&mut self, peer: PeerId, payload: Bytes) -> Result<()> {
        let state = self.hub.state.lock();
        let member = state
            .members
            .get(&peer)
            .ok_or(ConclaveError::UnknownPeer(peer))?;
        member
            .tx
            .send(
                TransportEvent::Whisper {
                    peer: self.id,
                    frames: vec![payload],
                }
                .to_frames(),
            )
            .map_err(|_| ConclaveError::ChannelSend)
    }

    fn shout(&mut self, group: &str, payload: Bytes) -> Result<()> {
        let state = self.hub.state.lock();
        let frames = TransportEvent::Shout {
            peer: self.id,
            group: group.to_owned(),
            frames: vec![payload],
        }
        .to_frames();
        for (id, member) in &state.members {
            if *id != self.id && member.groups.contains(group) {
                let _ = member.tx.send(frames.clone());
            }
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<Bytes>>> {
        if self.stopped {
            return Ok(None);
        }
        match timeout {
            None => self
                .rx
                .recv()
                .map(Some)
                .map_err(|_| ConclaveError::transport("inbox closed")),
            Some(d) if d.is_zero() => match self.rx.try_recv() {
                Ok(frames) => Ok(Some(frames)),
                Err(flume::TryRecvError::Empty) => Ok(None),
                Err(flume::TryRecvError::Disconnected) => {
                    Err(ConclaveError::transport("inbox closed"))
                }
            },
            Some(d) => match self.rx.recv_timeout(d) {
                Ok(frames) => Ok(Some(frames)),
                Err(flume::RecvTimeoutError::Timeout) => Ok(None),
                Err(flume::RecvTimeoutError::Disconnected) => {
                    Err(ConclaveError::transport("inbox closed"))
                }
            },
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let mut state = self.hub.state.lock();
        if state.members.remove(&self.id).is_some() {
            state.announce(self.id, &TransportEvent::Exit { peer: self.id });
        }
        Ok(())
    }
}

impl Drop for InprocTransport {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
