use std::collections::HashSet;

use dashmap::DashMap;
use metrics::{counter, gauge};

use crate::connection::{Connection, ConnectionId};
use crate::error::RelayError;
use crate::metrics::{RELAY_REAPED_TOTAL, ROOMS_ACTIVE};
use crate::room::{Identity, RoomId, RoomState};

/// In-memory authority over which identity owns which live connection in
/// which room.
///
/// Every mutation of a room happens under the write lock of the map shard
/// holding it, so a room is created and deleted atomically with its first
/// join and last departure. An empty room is never observable.
///
/// The lock is per shard, not per room. Unrelated rooms that hash to the same
/// shard wait on each other, and a broadcast holds its shard's read lock while
/// it queues frames, delaying joins and leaves in that shard until it is done.
/// Queueing never waits on a socket, so the hold is bounded by the member
/// count. Rooms in different shards do not contend.
///
/// Dead connections are discovered lazily: only a failed [`Registry::send_to`]
/// or [`Registry::broadcast`] removes a member besides an explicit leave.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: DashMap<RoomId, RoomState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection` in `room`, creating the room if needed.
    /// A previously bound connection for the same identity is closed.
    pub fn join(&self, room: &str, identity: &str, connection: Connection) {
        let id = connection.id();
        let mut created = false;
        let superseded = self
            .rooms
            .entry(room.to_owned())
            .or_insert_with(|| {
                created = true;
                RoomState::default()
            })
            .insert(identity, connection);

        if created {
            gauge!(ROOMS_ACTIVE).increment(1.0);
        }

        if let Some(old) = superseded.filter(|old| old.id() != id) {
            tracing::info!(
                room = %room,
                identity = %identity,
                superseded = %old.id(),
                connection = %id,
                "Identity rejoined, closing previous connection"
            );
            old.close();
        }
        tracing::debug!(room = %room, identity = %identity, connection = %id, "Joined room");
    }

    /// Remove `identity` from `room`. Returns whether an entry was removed.
    pub fn leave(&self, room: &str, identity: &str) -> bool {
        self.remove_where(room, identity, |state| state.remove(identity))
    }

    /// Remove `identity` from `room` only while it is still bound to the
    /// connection `id`. A superseded connection can never evict its successor.
    pub fn leave_connection(&self, room: &str, identity: &str, id: ConnectionId) -> bool {
        self.remove_where(room, identity, |state| state.remove_connection(identity, id))
    }

    fn remove_where<F>(&self, room: &str, identity: &str, take: F) -> bool
    where
        F: FnOnce(&mut RoomState) -> Option<Connection>,
    {
        let mut removed = None;
        let deleted = self
            .rooms
            .remove_if_mut(room, |_, state| {
                removed = take(state);
                state.is_empty()
            })
            .is_some();
        if deleted {
            gauge!(ROOMS_ACTIVE).decrement(1.0);
        }

        match removed {
            Some(connection) => {
                connection.close();
                tracing::debug!(
                    room = %room,
                    identity = %identity,
                    connection = %connection.id(),
                    room_deleted = deleted,
                    "Left room"
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of the identities currently in `room`.
    pub fn members(&self, room: &str) -> HashSet<Identity> {
        self.rooms
            .get(room)
            .map(|state| state.identities().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue `frame` for `identity` in `room`.
    ///
    /// A recipient whose send fails is removed; the error then names it so
    /// the caller can announce the departure.
    pub fn send_to(&self, room: &str, identity: &str, frame: &str) -> Result<(), RelayError> {
        let failed = {
            let state = self.rooms.get(room).ok_or(RelayError::NoSuchRecipient)?;
            let connection = state.get(identity).ok_or(RelayError::NoSuchRecipient)?;
            match connection.send(frame.to_owned()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(room = %room, identity = %identity, error = %e, "Send failed");
                    connection.id()
                }
            }
        };

        if self.leave_connection(room, identity, failed) {
            counter!(RELAY_REAPED_TOTAL).increment(1);
            Err(RelayError::Departed(identity.to_owned()))
        } else {
            Err(RelayError::NoSuchRecipient)
        }
    }

    /// Queue `frame` for every member of `room` except `exclude`.
    ///
    /// Returns the members this call removed because their send failed. Their
    /// departure is not announced here.
    pub fn broadcast(&self, room: &str, frame: &str, exclude: Option<&str>) -> Vec<Identity> {
        let failed: Vec<(Identity, ConnectionId)> = match self.rooms.get(room) {
            Some(state) => state
                .iter()
                .filter(|(identity, _)| Some(identity.as_str()) != exclude)
                .filter_map(|(identity, connection)| {
                    connection
                        .send(frame.to_owned())
                        .err()
                        .map(|_| (identity.clone(), connection.id()))
                })
                .collect(),
            None => return Vec::new(),
        };

        let reaped: Vec<Identity> = failed
            .into_iter()
            .filter(|(identity, id)| self.leave_connection(room, identity, *id))
            .map(|(identity, _)| identity)
            .collect();
        if !reaped.is_empty() {
            counter!(RELAY_REAPED_TOTAL).increment(reaped.len() as u64);
        }
        reaped
    }

    /// Rooms in which `identity` currently holds a connection.
    pub fn rooms_of(&self, identity: &str) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|entry| entry.value().get(identity).is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.iter().map(|entry| entry.value().len()).sum()
    }
}
