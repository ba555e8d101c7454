//! Named groups of identities for scoped relay and peer discovery.
//!
//! Locking is two-level: the map lock guards which rooms exist, and each room
//! guards its own membership. Membership changes hold the map lock shared, so
//! joins to different rooms do not contend. Creating or deleting a room takes
//! the map lock exclusively. Lock order is always map, then room.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::{
    events::{EventSink, RelayEvent},
    hub::HubError,
    identity::Identity,
    message::{Reply, Signal},
};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room is required")]
    InvalidRoom,
    #[error("room '{0}' not found")]
    RoomNotFound(String),
    #[error("recipient is required for directed messages")]
    MissingRecipient,
    #[error("failed to encode relayed message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to deliver to '{recipient}': {source}")]
    Send {
        recipient: Identity,
        #[source]
        source: HubError,
    },
}

#[derive(Default)]
struct Room {
    members: RwLock<HashSet<Identity>>,
}

impl Room {
    fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

pub struct RoomManager {
    rooms: RwLock<HashMap<String, Room>>,
    events: Arc<dyn EventSink>,
}

impl RoomManager {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Adds `identity` to `room`, creating the room on first join.
    pub fn join(&self, room: &str, identity: &Identity) -> Result<(), RoomError> {
        if room.is_empty() {
            return Err(RoomError::InvalidRoom);
        }

        {
            let rooms = self.rooms.read();
            if let Some(existing) = rooms.get(room) {
                existing.members.write().insert(identity.clone());
                debug!(%room, %identity, "joined room");
                return Ok(());
            }
        }

        let created = {
            let mut rooms = self.rooms.write();
            let created = !rooms.contains_key(room);
            rooms
                .entry(room.to_string())
                .or_default()
                .members
                .write()
                .insert(identity.clone());
            created
        };

        if created {
            self.events.emit(RelayEvent::RoomCreated {
                room: room.to_string(),
            });
        }
        debug!(%room, %identity, "joined room");
        Ok(())
    }

    /// Removes `identity` from `room`, deleting the room once nobody is left.
    pub fn leave(&self, room: &str, identity: &Identity) -> Result<(), RoomError> {
        if room.is_empty() {
            return Err(RoomError::InvalidRoom);
        }

        let emptied = {
            let rooms = self.rooms.read();
            let Some(existing) = rooms.get(room) else {
                return Err(RoomError::RoomNotFound(room.to_string()));
            };
            let mut members = existing.members.write();
            if members.remove(identity) {
                debug!(%room, %identity, "left room");
            }
            members.is_empty()
        };

        if emptied {
            self.remove_if_empty(room);
        }
        Ok(())
    }

    /// Removes `identity` from every room it belongs to. Returns the rooms it left.
    pub fn leave_all(&self, identity: &Identity) -> Vec<String> {
        let rooms = self.rooms_of(identity);
        for room in &rooms {
            // A concurrent leave may already have deleted the room; nothing to undo then.
            let _ = self.leave(room, identity);
        }
        rooms
    }

    /// Encodes `signal` and hands it to `deliver` for its recipient.
    ///
    /// Relay is routing only: sender and recipient do not need to share a room.
    pub async fn relay<F, Fut>(&self, signal: &Signal, deliver: F) -> Result<(), RoomError>
    where
        F: FnOnce(Identity, Bytes) -> Fut,
        Fut: Future<Output = Result<(), HubError>>,
    {
        let recipient = signal
            .recipient
            .clone()
            .ok_or(RoomError::MissingRecipient)?;
        let encoded = Reply::from_signal(signal).encode()?;

        deliver(recipient.clone(), encoded)
            .await
            .map_err(|source| RoomError::Send {
                recipient: recipient.clone(),
                source,
            })?;

        debug!(
            sender = %signal.sender,
            %recipient,
            kind = %signal.event,
            "message relayed"
        );
        Ok(())
    }

    pub fn peers_in_room(&self, room: &str) -> HashSet<Identity> {
        self.rooms
            .read()
            .get(room)
            .map(|existing| existing.members.read().clone())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, identity: &Identity) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .rooms
            .read()
            .iter()
            .filter(|(_, room)| room.members.read().contains(identity))
            .map(|(name, _)| name.clone())
            .collect();
        rooms.sort();
        rooms
    }

    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms
            .read()
            .get(room)
            .is_some_and(|existing| !existing.is_empty())
    }

    pub fn room_count(&self) -> usize {
        self.rooms
            .read()
            .values()
            .filter(|room| !room.is_empty())
            .count()
    }

    fn remove_if_empty(&self, room: &str) {
        let removed = {
            let mut rooms = self.rooms.write();
            // A join may have slipped in between releasing the read lock and now.
            if rooms.get(room).is_some_and(Room::is_empty) {
                rooms.remove(room).is_some()
            } else {
                false
            }
        };

        if removed {
            self.events.emit(RelayEvent::RoomDestroyed {
                room: room.to_string(),
            });
        }
    }
}
