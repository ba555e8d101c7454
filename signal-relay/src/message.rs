//! JSON wire protocol.
//!
//! Inbound frames carry a `type` field and are decoded into a [`Command`].
//! Outbound frames carry an `event` field instead and always name the
//! server-stamped `sender`. Payloads are kept as raw JSON so relayed bytes
//! come out exactly as they went in.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::identity::Identity;

pub type Payload = Box<RawValue>;

/// Event name used for error replies.
pub const ERROR_EVENT: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Broadcast,
    Join,
    Leave,
    Offer,
    Answer,
    IceCandidate,
    List,
    Me,
}

impl CommandKind {
    pub fn is_directed(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }
}

/// Message-type strings understood on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    pub broadcast: String,
    pub join: String,
    pub leave: String,
    pub offer: String,
    pub answer: String,
    pub ice_candidate: String,
    pub list: String,
    pub me: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            broadcast: "broadcast".into(),
            join: "join".into(),
            leave: "leave".into(),
            offer: "offer".into(),
            answer: "answer".into(),
            ice_candidate: "ice-candidate".into(),
            list: "list".into(),
            me: "me".into(),
        }
    }
}

impl Vocabulary {
    pub fn resolve(&self, label: &str) -> Option<CommandKind> {
        [
            CommandKind::Broadcast,
            CommandKind::Join,
            CommandKind::Leave,
            CommandKind::Offer,
            CommandKind::Answer,
            CommandKind::IceCandidate,
            CommandKind::List,
            CommandKind::Me,
        ]
        .into_iter()
        .find(|kind| self.label(*kind) == label)
    }

    pub fn label(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::Broadcast => &self.broadcast,
            CommandKind::Join => &self.join,
            CommandKind::Leave => &self.leave,
            CommandKind::Offer => &self.offer,
            CommandKind::Answer => &self.answer,
            CommandKind::IceCandidate => &self.ice_candidate,
            CommandKind::List => &self.list,
            CommandKind::Me => &self.me,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown message type: {0}")]
    UnknownCommand(String),
    #[error("room is required for {0} messages")]
    InvalidRoom(String),
    #[error("payload is required for {0} messages")]
    MissingPayload(String),
}

// `sender` is accepted on the wire but never trusted, so it is not read at all.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    room: Option<String>,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
}

/// Point-to-point signaling message (offer, answer, ICE candidate).
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: CommandKind,
    /// Wire label the message arrived with, echoed back as the event name.
    pub event: String,
    pub sender: Identity,
    pub room: Option<String>,
    pub recipient: Option<Identity>,
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Broadcast { payload: Payload },
    Join { room: String },
    Leave { room: String },
    Signal(Signal),
    List { room: Option<String> },
    Me,
}

/// Decodes an inbound frame, stamping `sender` as its origin.
pub fn decode(raw: &[u8], sender: &Identity, vocabulary: &Vocabulary) -> Result<Command, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    let kind = vocabulary
        .resolve(&envelope.kind)
        .ok_or_else(|| DecodeError::UnknownCommand(envelope.kind.clone()))?;

    let room = envelope.room.filter(|room| !room.is_empty());
    let recipient = envelope
        .recipient
        .filter(|recipient| !recipient.is_empty())
        .map(Identity::from);

    let command = match kind {
        CommandKind::Broadcast => Command::Broadcast {
            payload: envelope
                .payload
                .ok_or(DecodeError::MissingPayload(envelope.kind))?,
        },
        CommandKind::Join => Command::Join {
            room: room.ok_or(DecodeError::InvalidRoom(envelope.kind))?,
        },
        CommandKind::Leave => Command::Leave {
            room: room.ok_or(DecodeError::InvalidRoom(envelope.kind))?,
        },
        CommandKind::Offer | CommandKind::Answer | CommandKind::IceCandidate => {
            Command::Signal(Signal {
                kind,
                event: envelope.kind,
                sender: sender.clone(),
                room,
                recipient,
                payload: envelope.payload,
            })
        }
        CommandKind::List => Command::List { room },
        CommandKind::Me => Command::Me,
    };

    Ok(command)
}

/// Outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub event: String,
    pub sender: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Identity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Reply {
    pub fn new(event: impl Into<String>, sender: Identity) -> Self {
        Self {
            event: event.into(),
            sender,
            room: None,
            recipient: None,
            payload: None,
            members: None,
            message: None,
        }
    }

    pub fn error(sender: Identity, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(ERROR_EVENT, sender)
        }
    }

    pub fn from_signal(signal: &Signal) -> Self {
        Self {
            room: signal.room.clone(),
            recipient: signal.recipient.clone(),
            payload: signal.payload.clone(),
            ..Self::new(signal.event.clone(), signal.sender.clone())
        }
    }

    pub fn with_room(mut self, room: Option<String>) -> Self {
        self.room = room;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_members(mut self, members: Vec<Identity>) -> Self {
        self.members = Some(members);
        self
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}
