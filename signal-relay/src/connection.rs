//! Per-connection outbound delivery channel.
//!
//! Fan-out never writes to a socket. It drops bytes into a bounded queue owned
//! by the connection, and the connection's writer loop drains that queue at
//! its own pace. A queue that fills up is reported as [`EnqueueError::Full`]
//! so the hub can shed the slow consumer instead of waiting on it.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Capacity used when the configuration does not say otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("delivery queue is full")]
    Full,
    #[error("delivery queue is closed")]
    Closed,
}

/// What the relay core is allowed to do with a live connection.
pub trait ConnectionHandle: Send + Sync {
    /// Queues bytes for the connection without waiting.
    fn enqueue(&self, payload: Bytes) -> Result<(), EnqueueError>;

    /// Closes the queue. Bytes already queued are still drained by the writer.
    fn close(&self);
}

pub type SharedHandle = Arc<dyn ConnectionHandle>;

/// Creates the queue pair for one connection.
pub fn outbound_channel(capacity: usize) -> (ChannelHandle, Outbox) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ChannelHandle {
            sender: Mutex::new(Some(sender)),
        },
        Outbox { receiver },
    )
}

/// Producer half, shared between the registry and the connection's loops.
pub struct ChannelHandle {
    // Dropping the only sender is what closes the queue for the writer.
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl ChannelHandle {
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }
}

impl ConnectionHandle for ChannelHandle {
    fn enqueue(&self, payload: Bytes) -> Result<(), EnqueueError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        sender.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

/// Consumer half, owned by the connection's writer loop.
pub struct Outbox {
    receiver: mpsc::Receiver<Bytes>,
}

impl Outbox {
    /// Waits for the next queued message. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Takes the next queued message if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }

    /// Drains everything currently queued.
    pub fn drain(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
