//! Discrete relay events and the sink that observes them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The connection asked to leave or its read loop ended.
    Requested,
    /// The delivery queue was full and the connection was shed.
    SlowConsumer,
    /// The writer side went away before the connection was unregistered.
    WriterClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connected {
        identity: Identity,
    },
    Disconnected {
        identity: Identity,
        reason: DisconnectReason,
    },
    MessageDropped {
        identity: Identity,
    },
    RoomCreated {
        room: String,
    },
    RoomDestroyed {
        room: String,
    },
}

/// Injected observer for relay events. The core has no opinion on format or backend.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RelayEvent);
}

/// Counters backing the readiness endpoint.
#[derive(Debug, Default)]
pub struct RelayStats {
    connects: AtomicU64,
    disconnects: AtomicU64,
    dropped: AtomicU64,
    rooms_created: AtomicU64,
    rooms_destroyed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connects: u64,
    pub disconnects: u64,
    pub messages_dropped: u64,
    pub rooms_created: u64,
    pub rooms_destroyed: u64,
}

impl RelayStats {
    pub fn record(&self, event: &RelayEvent) {
        let counter = match event {
            RelayEvent::Connected { .. } => &self.connects,
            RelayEvent::Disconnected { .. } => &self.disconnects,
            RelayEvent::MessageDropped { .. } => &self.dropped,
            RelayEvent::RoomCreated { .. } => &self.rooms_created,
            RelayEvent::RoomDestroyed { .. } => &self.rooms_destroyed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            rooms_destroyed: self.rooms_destroyed.load(Ordering::Relaxed),
        }
    }
}

/// Default sink: structured logs plus counters.
#[derive(Debug, Default)]
pub struct TracingSink {
    stats: RelayStats,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: RelayEvent) {
        self.stats.record(&event);
        match event {
            RelayEvent::Connected { identity } => info!(%identity, "client registered"),
            RelayEvent::Disconnected { identity, reason } => {
                info!(%identity, ?reason, "client unregistered")
            }
            RelayEvent::MessageDropped { identity } => {
                warn!(%identity, "delivery queue full, message dropped")
            }
            RelayEvent::RoomCreated { room } => debug!(%room, "room created"),
            RelayEvent::RoomDestroyed { room } => debug!(%room, "room destroyed"),
        }
    }
}
