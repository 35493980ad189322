//! Registry of open relay connections
//!
//! This module tracks every connection the relay currently serves:
//! - Connection lifecycle (register on handshake, unregister on close)
//! - The outbound queue feeding each connection's writer task
//! - The entity identifier each connection announced, so the relay can tell
//!   the remaining peers who left
//! - Capacity enforcement
//!
//! The relay assigns no identities of its own beyond a connection number used
//! for routing and logging.

use log::{debug, info};
use shared::EntityId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

pub type ConnId = u32;

/// One open connection
#[derive(Debug)]
pub struct Peer {
    /// Connection number assigned by the relay
    pub id: ConnId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Entity identifier seen in this connection's messages, if any yet
    pub entity: Option<EntityId>,
    /// When the handshake completed
    pub connected_at: Instant,
    /// Frames relayed from this connection to others
    pub frames_relayed: u64,
    /// Queue drained by the connection's writer task
    sender: mpsc::UnboundedSender<String>,
}

impl Peer {
    pub fn new(id: ConnId, addr: SocketAddr, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            addr,
            entity: None,
            connected_at: Instant::now(),
            frames_relayed: 0,
            sender,
        }
    }

    /// Queues a frame without waiting; false if the writer task is gone
    pub fn enqueue(&self, text: &str) -> bool {
        self.sender.send(text.to_owned()).is_ok()
    }
}

/// All open connections, indexed by connection number
pub struct PeerRegistry {
    peers: HashMap<ConnId, Peer>,
    next_id: ConnId,
    max_peers: usize,
}

impl PeerRegistry {
    /// Creates an empty registry. Connection numbers start at 1.
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            next_id: 1,
            max_peers,
        }
    }

    /// Registers a connection, or returns None when the relay is full
    pub fn add_peer(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<ConnId> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        info!("Connection {} opened from {}", id, addr);
        self.peers.insert(id, Peer::new(id, addr, sender));

        Some(id)
    }

    /// Unregisters a connection. Dropping the returned peer closes its queue,
    /// which ends its writer task.
    pub fn remove_peer(&mut self, id: ConnId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        info!(
            "Connection {} from {} closed after {:?} ({} frames relayed)",
            id,
            peer.addr,
            peer.connected_at.elapsed(),
            peer.frames_relayed
        );
        Some(peer)
    }

    /// Records the entity identifier a connection speaks for
    pub fn set_entity(&mut self, id: ConnId, entity: EntityId) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };

        if peer.entity.as_ref() != Some(&entity) {
            info!("Connection {} speaks for entity {}", id, entity);
            peer.entity = Some(entity);
        }
        true
    }

    /// Returns true if some open connection has announced `entity`.
    ///
    /// A client that reconnects before the relay notices its old connection
    /// dropped speaks for the same entity on two connections for a while.
    /// Only the last of them closing means the entity has left.
    pub fn speaks_for(&self, entity: &EntityId) -> bool {
        self.peers
            .values()
            .any(|peer| peer.entity.as_ref() == Some(entity))
    }

    /// Queues `text` on every connection except `exclude`.
    ///
    /// Never blocks: a slow reader only grows its own queue. Returns the
    /// number of connections the frame was queued for.
    pub fn broadcast(&mut self, text: &str, exclude: Option<ConnId>) -> usize {
        let mut delivered = 0;
        for peer in self.peers.values() {
            if Some(peer.id) == exclude {
                continue;
            }
            if peer.enqueue(text) {
                delivered += 1;
            } else {
                debug!("Writer for connection {} is gone", peer.id);
            }
        }

        if let Some(origin) = exclude.and_then(|id| self.peers.get_mut(&id)) {
            origin.frames_relayed += 1;
        }

        delivered
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no connections are open
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
