//! Message envelope and dispatch rules between the drag session, the
//! position table and the channel.
//!
//! Outbound, every `PositionChanged` becomes a `move` packet stamped with the
//! local identifier and the next sequence number. Inbound, `move` packets are
//! merged into the table under the identifier they carry and `leave` packets
//! drop the entry. Malformed frames are discarded without touching the table.

use crate::channel::{ConnectionChannel, MessageHandler};
use crate::error::SendError;
use crate::input::PositionChanged;
use crate::table::{PositionTable, RemoteUpdate};
use log::{debug, info, warn};
use shared::{decode, encode, EntityId, MalformedMessage, Packet, Position};
use std::sync::Arc;

/// What an inbound frame did to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Moved { id: EntityId, outcome: RemoteUpdate },
    Left { id: EntityId, removed: bool },
}

pub struct SyncProtocol {
    table: Arc<PositionTable>,
    last_seq: u64,
}

impl SyncProtocol {
    /// Creates the protocol over `table`. The first packet sent carries
    /// sequence number 1.
    pub fn new(table: Arc<PositionTable>) -> Self {
        Self { table, last_seq: 0 }
    }

    /// The table inbound packets are merged into
    pub fn table(&self) -> &Arc<PositionTable> {
        &self.table
    }

    /// Identifier stamped on every outbound packet
    pub fn local_id(&self) -> &EntityId {
        self.table.local_id()
    }

    /// Serializes a local change and hands it to the channel.
    ///
    /// A rejected send drops the update; the next change supersedes it.
    pub fn publish(
        &mut self,
        change: &PositionChanged,
        channel: &ConnectionChannel,
    ) -> Result<(), SendError> {
        let packet = self.move_packet(change.id.clone(), change.position);
        transmit(&packet, channel)
    }

    /// Sends the current local position, used whenever a channel opens
    pub fn announce(&mut self, channel: &ConnectionChannel) -> Result<(), SendError> {
        let packet = self.move_packet(self.local_id().clone(), self.table.local_position());
        transmit(&packet, channel)
    }

    pub fn handle_inbound(&self, text: &str) -> Result<Inbound, MalformedMessage> {
        apply_inbound(&self.table, text)
    }

    /// Handler to install on the channel once it opens
    pub fn inbound_handler(&self) -> MessageHandler {
        let table = Arc::clone(&self.table);
        Box::new(move |text: &str| {
            if let Err(e) = apply_inbound(&table, text) {
                warn!("Dropping inbound frame: {}", e);
            }
        })
    }

    fn move_packet(&mut self, id: EntityId, position: Position) -> Packet {
        self.last_seq += 1;
        Packet::moved(id, self.last_seq, position)
    }
}

fn transmit(packet: &Packet, channel: &ConnectionChannel) -> Result<(), SendError> {
    let text = encode(packet).map_err(|e| SendError::Encode(e.to_string()))?;
    channel.send(text)
}

/// Decodes one inbound frame and merges it into `table`.
///
/// The table is untouched when the frame is malformed.
pub fn apply_inbound(table: &PositionTable, text: &str) -> Result<Inbound, MalformedMessage> {
    match decode(text)? {
        Packet::Move { id, seq, x, y } => {
            let outcome = table.set_remote(id.clone(), seq, Position::new(x, y));
            match outcome {
                RemoteUpdate::Inserted => info!("First position from {}: ({}, {})", id, x, y),
                RemoteUpdate::RejectedLocal => debug!("Ignoring move addressed to local id"),
                _ => debug!("{} -> ({}, {}) seq {}: {:?}", id, x, y, seq, outcome),
            }
            Ok(Inbound::Moved { id, outcome })
        }

        Packet::Leave { id } => {
            let removed = table.remove_remote(&id);
            if removed {
                info!("{} left", id);
            }
            Ok(Inbound::Left { id, removed })
        }
    }
}
