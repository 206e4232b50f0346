use std::collections::HashMap;

use crate::connection::{Connection, ConnectionId};

pub type RoomId = String;
pub type Identity = String;

// Live participants of one room, at most one connection per identity
#[derive(Debug, Default)]
pub struct RoomState {
    participants: HashMap<Identity, Connection>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connection` for `identity`, returning the connection it replaced.
    pub fn insert(&mut self, identity: &str, connection: Connection) -> Option<Connection> {
        self.participants.insert(identity.to_owned(), connection)
    }

    pub fn remove(&mut self, identity: &str) -> Option<Connection> {
        self.participants.remove(identity)
    }

    /// Remove `identity` only while it is still bound to connection `id`.
    pub fn remove_connection(&mut self, identity: &str, id: ConnectionId) -> Option<Connection> {
        match self.participants.get(identity) {
            Some(current) if current.id() == id => self.participants.remove(identity),
            _ => None,
        }
    }

    pub fn get(&self, identity: &str) -> Option<&Connection> {
        self.participants.get(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &Connection)> {
        self.participants.iter()
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.participants.keys()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
