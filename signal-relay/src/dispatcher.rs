//! Routes decoded commands to the hub or the room manager.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    hub::{HubError, HubHandle},
    identity::Identity,
    message::{self, Command, CommandKind, DecodeError, Reply, Vocabulary},
    registry::Registry,
    rooms::{RoomError, RoomManager},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sender '{0}' is no longer registered")]
    NotRegistered(Identity),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    /// Whether the sender should get an `error` event back.
    ///
    /// Malformed frames are only logged, and nothing can be sent to a shed
    /// sender or once the hub is gone.
    pub fn is_reported(&self) -> bool {
        !matches!(
            self,
            Self::NotRegistered(_)
                | Self::Decode(DecodeError::Malformed(_))
                | Self::Hub(HubError::Stopped)
                | Self::Encode(_)
        )
    }
}

pub struct Dispatcher {
    hub: HubHandle,
    registry: Arc<Registry>,
    rooms: Arc<RoomManager>,
    vocabulary: Vocabulary,
}

impl Dispatcher {
    pub fn new(
        hub: HubHandle,
        registry: Arc<Registry>,
        rooms: Arc<RoomManager>,
        vocabulary: Vocabulary,
    ) -> Self {
        Self {
            hub,
            registry,
            rooms,
            vocabulary,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Processes one inbound frame. Failures are logged and, where the
    /// protocol calls for it, answered with an `error` event. Never fails the
    /// caller's read loop.
    pub async fn handle(&self, sender: &Identity, raw: &[u8]) {
        let Err(err) = self.dispatch(sender, raw).await else {
            return;
        };

        if !err.is_reported() {
            warn!(%sender, error = %err, "dropping inbound message");
            return;
        }

        debug!(%sender, error = %err, "rejecting inbound message");
        let reply = match Reply::error(sender.clone(), err.to_string()).encode() {
            Ok(reply) => reply,
            Err(encode_err) => {
                warn!(%sender, error = %encode_err, "failed to encode error reply");
                return;
            }
        };
        if let Err(deliver_err) = self.hub.deliver(sender.clone(), reply).await {
            debug!(%sender, error = %deliver_err, "failed to deliver error reply");
        }
    }

    /// Decodes and routes one inbound frame.
    ///
    /// Frames from a sender the hub has already shed are refused, so a
    /// draining connection cannot rejoin rooms after its memberships were dropped.
    pub async fn dispatch(&self, sender: &Identity, raw: &[u8]) -> Result<(), DispatchError> {
        if !self.registry.contains(sender) {
            return Err(DispatchError::NotRegistered(sender.clone()));
        }
        let command = message::decode(raw, sender, &self.vocabulary)?;
        self.route(sender, command).await
    }

    async fn route(&self, sender: &Identity, command: Command) -> Result<(), DispatchError> {
        match command {
            Command::Broadcast { payload } => {
                let encoded = Reply::new(self.label(CommandKind::Broadcast), sender.clone())
                    .with_payload(payload)
                    .encode()?;
                let report = self.hub.broadcast(encoded, Some(sender.clone())).await?;
                debug!(
                    %sender,
                    delivered = report.delivered,
                    evicted = report.evicted.len(),
                    "broadcast relayed"
                );
            }
            Command::Signal(signal) => {
                self.rooms
                    .relay(&signal, |recipient, bytes| self.hub.deliver(recipient, bytes))
                    .await?;
            }
            Command::Join { room } => self.rooms.join(&room, sender)?,
            Command::Leave { room } => self.rooms.leave(&room, sender)?,
            Command::List { room } => {
                let members = match &room {
                    Some(room) => {
                        let mut peers: Vec<Identity> =
                            self.rooms.peers_in_room(room).into_iter().collect();
                        peers.sort();
                        peers
                    }
                    None => self.registry.identities(),
                };
                let reply = Reply::new(self.label(CommandKind::List), sender.clone())
                    .with_room(room)
                    .with_members(members);
                self.reply(sender, &reply).await?;
            }
            Command::Me => {
                let reply = Reply::new(self.label(CommandKind::Me), sender.clone());
                self.reply(sender, &reply).await?;
            }
        }
        Ok(())
    }

    async fn reply(&self, sender: &Identity, reply: &Reply) -> Result<(), DispatchError> {
        self.hub.deliver(sender.clone(), reply.encode()?).await?;
        Ok(())
    }

    fn label(&self, kind: CommandKind) -> String {
        self.vocabulary.label(kind).to_string()
    }
}
