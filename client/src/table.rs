//! Position table shared between local authorship and remote updates
//!
//! The table maps every known entity identifier to its last known position.
//! Writes follow a single-writer-per-key discipline:
//! - The local entry is written only through the [`LocalEntity`] handle that is
//!   created together with the table. There is exactly one such handle.
//! - Remote entries are written only by the inbound protocol path, which can
//!   never touch the local key.
//!
//! The table is read by the renderer (or anything else that wants a snapshot)
//! through [`PositionTable::all_entries`].

use log::debug;
use shared::{EntityId, Position};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One row of the table. `seq` is the sequence number of the message that
/// produced a remote position and stays 0 on the local row.
#[derive(Debug, Clone, Copy)]
struct Entry {
    position: Position,
    seq: u64,
}

/// Outcome of merging a remote update into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUpdate {
    /// First sighting of this identifier
    Inserted,
    /// Newer position replaced the stored one
    Updated,
    /// Sequence number not newer than the stored one, ignored
    Stale,
    /// The update named the local identifier and was ignored
    RejectedLocal,
}

#[derive(Debug)]
pub struct PositionTable {
    local_id: EntityId,
    entries: RwLock<HashMap<EntityId, Entry>>,
}

impl PositionTable {
    /// Creates the table with its local entry and returns the only handle
    /// allowed to move that entry.
    pub fn new(local_id: EntityId, initial: Position) -> (Arc<Self>, LocalEntity) {
        let mut entries = HashMap::new();
        entries.insert(
            local_id.clone(),
            Entry {
                position: initial,
                seq: 0,
            },
        );

        let table = Arc::new(Self {
            local_id,
            entries: RwLock::new(entries),
        });

        let local = LocalEntity {
            table: Arc::clone(&table),
        };

        (table, local)
    }

    /// Identifier of the entity this process owns
    pub fn local_id(&self) -> &EntityId {
        &self.local_id
    }

    /// Current position of the local entity
    pub fn local_position(&self) -> Position {
        // The local row is inserted at construction and never removed
        self.get(&self.local_id).unwrap_or_else(Position::spawn)
    }

    /// Last known position of `id`.
    ///
    /// Returns `None` for identifiers never seen, and for remote entities
    /// removed after their `leave`.
    pub fn get(&self, id: &EntityId) -> Option<Position> {
        self.read().get(id).map(|entry| entry.position)
    }

    /// Merges a remote position using last-write-wins on `seq`.
    pub fn set_remote(&self, id: EntityId, seq: u64, position: Position) -> RemoteUpdate {
        if id == self.local_id {
            return RemoteUpdate::RejectedLocal;
        }

        let mut entries = self.write();
        match entries.get_mut(&id) {
            Some(entry) if seq <= entry.seq => {
                debug!("Stale update for {} (seq {} <= {})", id, seq, entry.seq);
                RemoteUpdate::Stale
            }
            Some(entry) => {
                *entry = Entry { position, seq };
                RemoteUpdate::Updated
            }
            None => {
                entries.insert(id, Entry { position, seq });
                RemoteUpdate::Inserted
            }
        }
    }

    /// Drops a remote entry. Returns false for unknown identifiers and for
    /// the local identifier, which is never removed.
    pub fn remove_remote(&self, id: &EntityId) -> bool {
        if *id == self.local_id {
            return false;
        }
        self.write().remove(id).is_some()
    }

    /// Snapshot of every entry, sorted by identifier
    pub fn all_entries(&self) -> Vec<(EntityId, Position)> {
        let mut entries: Vec<(EntityId, Position)> = self
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.position))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of known entities, the local one included
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Always false: the local entry exists for the lifetime of the table
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn set_local(&self, position: Position) {
        let mut entries = self.write();
        let entry = entries.entry(self.local_id.clone()).or_insert(Entry {
            position,
            seq: 0,
        });
        entry.position = position;
    }

    // A panic while holding the lock cannot leave an entry half-written, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive write handle for the locally owned entry
#[derive(Debug)]
pub struct LocalEntity {
    table: Arc<PositionTable>,
}

impl LocalEntity {
    /// Identifier of the owned entity
    pub fn id(&self) -> &EntityId {
        self.table.local_id()
    }

    pub fn position(&self) -> Position {
        self.table.local_position()
    }

    /// Moves the owned entity. Takes `&mut self` so only the holder of the
    /// handle can write.
    pub fn set(&mut self, position: Position) {
        self.table.set_local(position);
    }
}
