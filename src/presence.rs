use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;

use crate::metrics::{ROOM_JOINS_TOTAL, ROOM_LEAVES_TOTAL};
use crate::persistence::ParticipantStore;
use crate::registry::Registry;
use crate::room::{Identity, RoomId};
use crate::signal::Outbound;

/// Membership change queued for the participant store.
#[derive(Debug)]
enum StoreEvent {
    Joined { room: RoomId, identity: Identity },
    Left { room: RoomId, identity: Identity },
}

/// Emits presence events to the rest of a room and mirrors membership into
/// the participant store.
///
/// Store updates are applied by a single worker task in the order the
/// membership changes happened, so a slow `record_joined` can never be
/// overtaken by the matching `record_left`.
#[derive(Clone)]
pub struct Presence {
    registry: Arc<Registry>,
    events: mpsc::UnboundedSender<StoreEvent>,
}

impl Presence {
    /// Must be called from within a Tokio runtime; the store worker runs
    /// until every clone of the returned value is dropped.
    pub fn new(registry: Arc<Registry>, store: Arc<dyn ParticipantStore>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(store_worker(store, rx));
        Self { registry, events }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Announce `identity` to everyone else in `room`.
    pub fn joined(&self, room: &str, identity: &str) {
        counter!(ROOM_JOINS_TOTAL).increment(1);
        self.record(StoreEvent::Joined {
            room: room.to_owned(),
            identity: identity.to_owned(),
        });

        let event = Outbound::UserJoined {
            username: identity.to_owned(),
            room_id: room.to_owned(),
        };
        let departed = self.broadcast(room, &event, Some(identity));
        self.settle(room, departed);
    }

    /// Announce that `identity` has been removed from `room`.
    ///
    /// Only the caller whose removal actually succeeded may call this, which
    /// keeps `user_left` to one event per departure.
    pub fn departed(&self, room: &str, identity: &str) {
        self.settle(room, vec![identity.to_owned()]);
    }

    // Announcing one departure can uncover more dead members; drain them
    // iteratively until a broadcast completes cleanly.
    fn settle(&self, room: &str, mut pending: Vec<Identity>) {
        while let Some(gone) = pending.pop() {
            tracing::info!(room = %room, identity = %gone, "Participant left");
            counter!(ROOM_LEAVES_TOTAL).increment(1);
            self.record(StoreEvent::Left {
                room: room.to_owned(),
                identity: gone.clone(),
            });

            let event = Outbound::UserLeft {
                username: gone,
                room_id: room.to_owned(),
            };
            pending.extend(self.broadcast(room, &event, None));
        }
    }

    fn broadcast(&self, room: &str, event: &Outbound, exclude: Option<&str>) -> Vec<Identity> {
        match event.encode() {
            Ok(frame) => self.registry.broadcast(room, &frame, exclude),
            Err(e) => {
                tracing::error!(room = %room, error = %e, "Failed to encode presence event");
                Vec::new()
            }
        }
    }

    fn record(&self, event: StoreEvent) {
        if let Err(e) = self.events.send(event) {
            tracing::warn!(event = ?e.0, "Participant store worker is gone, dropping update");
        }
    }
}

async fn store_worker(store: Arc<dyn ParticipantStore>, mut rx: mpsc::UnboundedReceiver<StoreEvent>) {
    while let Some(event) = rx.recv().await {
        let (result, room, identity) = match event {
            StoreEvent::Joined { room, identity } => {
                (store.record_joined(&room, &identity).await, room, identity)
            }
            StoreEvent::Left { room, identity } => {
                (store.record_left(&room, &identity).await, room, identity)
            }
        };
        if let Err(e) = result {
            tracing::warn!(room = %room, identity = %identity, error = %e, "Participant store update failed");
        }
    }
    tracing::debug!("Participant store worker stopped");
}
