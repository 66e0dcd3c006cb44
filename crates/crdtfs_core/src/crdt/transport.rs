//! Transport abstraction for exchanging sync messages with peers.
//!
//! Concrete transports (WebSocket relay, WebRTC, ...) live outside this
//! crate. [`MemoryHub`] and [`MemoryTransport`] connect replicas inside one
//! process, which is what tests and embedders without a network use.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{CrdtfsError, Result};

/// Unique identifier for a peer in a room.
pub type PeerId = String;

/// Something that happened on a transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connected to the room
    PeerJoined(PeerId),
    /// A peer left the room
    PeerLeft(PeerId),
    /// A message arrived from a peer
    Message {
        /// Sender
        from: PeerId,
        /// Opaque sync message bytes
        data: Vec<u8>,
    },
}

/// Cross-platform trait for sync transports.
///
/// Implementations broadcast opaque messages to every other peer of one
/// room. Delivery may duplicate or reorder messages; the sync protocol
/// tolerates both.
pub trait Transport: Send + Sync {
    /// Join the room.
    ///
    /// May return before the connection is fully established; use
    /// `is_connected()` to check.
    fn connect(&mut self) -> Result<()>;

    /// Leave the room and release resources.
    fn disconnect(&mut self) -> Result<()>;

    /// Broadcast a message to the other peers.
    fn send(&self, message: Vec<u8>) -> Result<()>;

    /// Drain the events received since the last call.
    fn poll_events(&self) -> Result<Vec<TransportEvent>>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Get the local peer ID.
    ///
    /// Returns None if not connected.
    fn peer_id(&self) -> Option<PeerId>;
}

/// In-process message switch shared by [`MemoryTransport`]s.
///
/// Cloning the hub shares the same rooms.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    rooms: Arc<Mutex<BTreeMap<String, BTreeMap<PeerId, VecDeque<TransportEvent>>>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for `peer_id` in `room`. It joins on `connect`.
    pub fn transport(&self, room: impl Into<String>, peer_id: impl Into<PeerId>) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            room: room.into(),
            peer_id: peer_id.into(),
            connected: false,
        }
    }

    /// Peers currently connected to `room`.
    pub fn peers(&self, room: &str) -> Vec<PeerId> {
        self.lock()
            .get(room)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeMap<PeerId, VecDeque<TransportEvent>>>> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn join(&self, room: &str, peer_id: &str) {
        let mut rooms = self.lock();
        let peers = rooms.entry(room.to_string()).or_default();
        for queue in peers.values_mut() {
            queue.push_back(TransportEvent::PeerJoined(peer_id.to_string()));
        }
        let existing: VecDeque<TransportEvent> = peers
            .keys()
            .map(|other| TransportEvent::PeerJoined(other.clone()))
            .collect();
        peers.insert(peer_id.to_string(), existing);
    }

    fn leave(&self, room: &str, peer_id: &str) {
        let mut rooms = self.lock();
        let Some(peers) = rooms.get_mut(room) else {
            return;
        };
        peers.remove(peer_id);
        for queue in peers.values_mut() {
            queue.push_back(TransportEvent::PeerLeft(peer_id.to_string()));
        }
        if peers.is_empty() {
            rooms.remove(room);
        }
    }

    fn broadcast(&self, room: &str, from: &str, data: &[u8]) {
        let mut rooms = self.lock();
        if let Some(peers) = rooms.get_mut(room) {
            for (peer, queue) in peers.iter_mut() {
                if peer != from {
                    queue.push_back(TransportEvent::Message {
                        from: from.to_string(),
                        data: data.to_vec(),
                    });
                }
            }
        }
    }

    fn drain(&self, room: &str, peer_id: &str) -> Vec<TransportEvent> {
        self.lock()
            .get_mut(room)
            .and_then(|peers| peers.get_mut(peer_id))
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

/// A peer connected through a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: MemoryHub,
    room: String,
    peer_id: PeerId,
    connected: bool,
}

impl MemoryTransport {
    /// Room this transport joins.
    pub fn room(&self) -> &str {
        &self.room
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<()> {
        if !self.connected {
            self.hub.join(&self.room, &self.peer_id);
            self.connected = true;
            log::debug!("[transport] {} joined {}", self.peer_id, self.room);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.hub.leave(&self.room, &self.peer_id);
            self.connected = false;
            log::debug!("[transport] {} left {}", self.peer_id, self.room);
        }
        Ok(())
    }

    fn send(&self, message: Vec<u8>) -> Result<()> {
        if !self.connected {
            return Err(CrdtfsError::Transport(format!(
                "{} is not connected",
                self.peer_id
            )));
        }
        self.hub.broadcast(&self.room, &self.peer_id, &message);
        Ok(())
    }

    fn poll_events(&self) -> Result<Vec<TransportEvent>> {
        if !self.connected {
            return Ok(Vec::new());
        }
        Ok(self.hub.drain(&self.room, &self.peer_id))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn peer_id(&self) -> Option<PeerId> {
        self.connected.then(|| self.peer_id.clone())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if self.connected {
            self.hub.leave(&self.room, &self.peer_id);
        }
    }
}
