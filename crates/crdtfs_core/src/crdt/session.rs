//! Sync session: drives the sync protocol over a [`Transport`].
//!
//! A session is bound to one room. Call [`SyncSession::pump`] periodically
//! (or whenever the transport signals activity) to process incoming
//! messages and send local operations. Stopping at any point is safe: the
//! next handshake fills whatever gap was left.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::sync::{SyncMessage, SyncProtocol};
use super::transport::{PeerId, Transport, TransportEvent};
use crate::document::Document;
use crate::error::{CrdtfsError, Result};

/// Statistics from one pump round.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Number of messages received from peers
    pub messages_received: usize,

    /// Number of messages sent to peers
    pub messages_sent: usize,

    /// Number of received messages that could not be applied
    pub messages_rejected: usize,
}

/// Binds a document's room to a transport.
pub struct SyncSession {
    room: String,
    transport: Box<dyn Transport>,
    peers: BTreeSet<PeerId>,
}

impl SyncSession {
    /// Create a session for `room`. Nothing is sent until [`start`](Self::start).
    pub fn new(room: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            room: room.into(),
            transport,
            peers: BTreeSet::new(),
        }
    }

    /// Room this session replicates.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Peers seen joining and not yet leaving.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.iter()
    }

    /// Whether the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Connect and announce our state vector.
    pub fn start(&mut self, doc: &mut Document) -> Result<()> {
        if doc.room() != self.room {
            return Err(CrdtfsError::Transport(format!(
                "document room '{}' does not match session room '{}'",
                doc.room(),
                self.room
            )));
        }
        self.transport.connect()?;
        self.transport
            .send(SyncProtocol::new(doc).create_sync_step1())?;
        // The handshake covers anything dropped from the broadcast queue
        doc.take_resync_needed();
        log::debug!("[session] Started sync for {}", self.room);
        Ok(())
    }

    /// Disconnect. The document keeps every operation it has.
    pub fn stop(&mut self) -> Result<()> {
        self.transport.disconnect()?;
        self.peers.clear();
        log::debug!("[session] Stopped sync for {}", self.room);
        Ok(())
    }

    /// Perform a sync round.
    ///
    /// 1. Receive events from the transport and answer them
    /// 2. Broadcast operations produced locally since the last round
    ///
    /// A message that cannot be applied is logged and skipped; it does not
    /// abort the round.
    pub fn pump(&mut self, doc: &mut Document) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        if !self.transport.is_connected() {
            return Ok(stats);
        }

        for event in self.transport.poll_events()? {
            match event {
                TransportEvent::PeerJoined(peer) => {
                    log::debug!("[session] Peer joined: {}", peer);
                    self.peers.insert(peer);
                    self.transport
                        .send(SyncProtocol::new(doc).create_sync_step1())?;
                    stats.messages_sent += 1;
                }
                TransportEvent::PeerLeft(peer) => {
                    log::debug!("[session] Peer left: {}", peer);
                    self.peers.remove(&peer);
                }
                TransportEvent::Message { from, data } => {
                    stats.messages_received += 1;
                    match SyncProtocol::new(doc).handle_message(&data) {
                        Ok(Some(response)) => {
                            self.transport.send(response)?;
                            stats.messages_sent += 1;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::warn!("[session] Dropping message from {}: {}", from, e);
                            stats.messages_rejected += 1;
                        }
                    }
                }
            }
        }

        if self.broadcast(doc)? {
            stats.messages_sent += 1;
        }

        Ok(stats)
    }

    /// Send local operations queued since the last broadcast as an Update.
    ///
    /// Returns whether a message was sent. While disconnected the queue is
    /// left alone; peers catch up through the handshake instead. If the
    /// document dropped queued operations, a SyncStep1 goes out in place of
    /// the Update so peers ask for them.
    pub fn broadcast(&mut self, doc: &mut Document) -> Result<bool> {
        if !self.transport.is_connected() {
            return Ok(false);
        }
        if doc.take_resync_needed() {
            let skipped = doc.take_outgoing().len();
            log::debug!(
                "[session] Broadcast queue overflowed; resyncing ({} queued operations skipped)",
                skipped
            );
            self.resync(doc)?;
            return Ok(true);
        }
        let ops = doc.take_outgoing();
        if ops.is_empty() {
            return Ok(false);
        }
        let message = SyncProtocol::new(doc).create_update_message(&ops)?;
        log::debug!(
            "[session] Broadcasting {} operations ({} bytes)",
            ops.len(),
            message.len()
        );
        self.transport.send(message)?;
        Ok(true)
    }

    /// Send a bare SyncStep1, asking peers for anything we miss.
    pub fn resync(&mut self, doc: &mut Document) -> Result<()> {
        let step1 = SyncMessage::SyncStep1(doc.state_vector().encode()).encode();
        self.transport.send(step1)
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("room", &self.room)
            .field("connected", &self.transport.is_connected())
            .field("peers", &self.peers)
            .finish()
    }
}
