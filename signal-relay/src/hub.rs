//! Connection lifecycle actor.
//!
//! Registration, unregistration and outbound delivery all funnel through one
//! task reading three bounded channels, so a broadcast can never interleave
//! with a half-finished registration or a second removal of the same identity.
//!
//! Per-connection lifecycle: `Connecting -> Registered -> Removed`. A handle
//! leaves the registry either because its owner asked (`unregister`) or
//! because a delivery found its queue full or closed. Either way the handle
//! is closed, every room membership is dropped and a disconnect event is
//! emitted, exactly once.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace};

use crate::{
    connection::{EnqueueError, SharedHandle},
    events::{DisconnectReason, EventSink, RelayEvent},
    identity::Identity,
    registry::{Registry, RegistryError},
    rooms::RoomManager,
};

/// Capacity of each hub input channel when the configuration does not say otherwise.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("'{0}' was shed because its delivery queue was unavailable")]
    Shed(Identity),
    #[error("hub is no longer running")]
    Stopped,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<Identity>,
}

struct Register {
    identity: Identity,
    handle: SharedHandle,
    respond_to: oneshot::Sender<Result<(), RegistryError>>,
}

struct Unregister {
    identity: Identity,
    respond_to: oneshot::Sender<Result<(), RegistryError>>,
}

enum Outbound {
    Broadcast {
        payload: Bytes,
        exclude: Option<Identity>,
        respond_to: oneshot::Sender<BroadcastReport>,
    },
    Direct {
        recipient: Identity,
        payload: Bytes,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<Unregister>,
    outbound_tx: mpsc::Sender<Outbound>,
}

impl HubHandle {
    /// Moves a connection from `Connecting` to `Registered`.
    pub async fn register(&self, identity: Identity, handle: SharedHandle) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.register_tx
            .send(Register {
                identity,
                handle,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Stopped)?;
        Ok(response.await.map_err(|_| HubError::Stopped)??)
    }

    /// Removes a connection. Reports `NotFound` if it was already gone.
    pub async fn unregister(&self, identity: Identity) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.unregister_tx
            .send(Unregister {
                identity,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Stopped)?;
        Ok(response.await.map_err(|_| HubError::Stopped)??)
    }

    /// Fans `payload` out to every registered connection except `exclude`.
    pub async fn broadcast(
        &self,
        payload: Bytes,
        exclude: Option<Identity>,
    ) -> Result<BroadcastReport, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.outbound_tx
            .send(Outbound::Broadcast {
                payload,
                exclude,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Stopped)?;
        response.await.map_err(|_| HubError::Stopped)
    }

    /// Delivers `payload` to one connection.
    pub async fn deliver(&self, recipient: Identity, payload: Bytes) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.outbound_tx
            .send(Outbound::Direct {
                recipient,
                payload,
                respond_to,
            })
            .await
            .map_err(|_| HubError::Stopped)?;
        response.await.map_err(|_| HubError::Stopped)?
    }

    pub fn is_running(&self) -> bool {
        !self.outbound_tx.is_closed()
    }
}

pub struct Hub {
    registry: Arc<Registry>,
    rooms: Arc<RoomManager>,
    events: Arc<dyn EventSink>,
    register_rx: mpsc::Receiver<Register>,
    unregister_rx: mpsc::Receiver<Unregister>,
    outbound_rx: mpsc::Receiver<Outbound>,
}

impl Hub {
    /// Starts the hub task. It stops once every [`HubHandle`] has been dropped.
    pub fn spawn(
        registry: Arc<Registry>,
        rooms: Arc<RoomManager>,
        events: Arc<dyn EventSink>,
        capacity: usize,
    ) -> (HubHandle, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let hub = Hub {
            registry,
            rooms,
            events,
            register_rx,
            unregister_rx,
            outbound_rx,
        };
        let task = tokio::spawn(hub.run());

        (
            HubHandle {
                register_tx,
                unregister_tx,
                outbound_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        loop {
            select! {
                biased;
                Some(request) = self.register_rx.recv() => self.handle_register(request),
                Some(request) = self.unregister_rx.recv() => self.handle_unregister(request),
                Some(request) = self.outbound_rx.recv() => self.handle_outbound(request),
                else => break,
            }
        }
        debug!("hub stopped");
    }

    fn handle_register(&self, request: Register) {
        let Register {
            identity,
            handle,
            respond_to,
        } = request;

        let result = self.registry.add(identity.clone(), handle);
        if result.is_ok() {
            self.events.emit(RelayEvent::Connected { identity });
        }
        let _ = respond_to.send(result);
    }

    fn handle_unregister(&self, request: Unregister) {
        let result = self.remove(&request.identity, DisconnectReason::Requested);
        if result.is_err() {
            trace!(identity = %request.identity, "unregister for unknown identity ignored");
        }
        let _ = request.respond_to.send(result);
    }

    fn handle_outbound(&self, request: Outbound) {
        match request {
            Outbound::Broadcast {
                payload,
                exclude,
                respond_to,
            } => {
                let report = self.fan_out(&payload, exclude.as_ref());
                let _ = respond_to.send(report);
            }
            Outbound::Direct {
                recipient,
                payload,
                respond_to,
            } => {
                let _ = respond_to.send(self.send_to(&recipient, payload));
            }
        }
    }

    fn fan_out(&self, payload: &Bytes, exclude: Option<&Identity>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (identity, handle) in self.registry.snapshot() {
            if exclude == Some(&identity) {
                continue;
            }
            match handle.enqueue(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    self.shed(&identity, err);
                    report.evicted.push(identity);
                }
            }
        }

        trace!(
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "broadcast fanned out"
        );
        report
    }

    fn send_to(&self, recipient: &Identity, payload: Bytes) -> Result<(), HubError> {
        let handle = self.registry.get(recipient)?;
        handle.enqueue(payload).map_err(|err| {
            self.shed(recipient, err);
            HubError::Shed(recipient.clone())
        })
    }

    fn shed(&self, identity: &Identity, err: EnqueueError) {
        let reason = match err {
            EnqueueError::Full => {
                self.events.emit(RelayEvent::MessageDropped {
                    identity: identity.clone(),
                });
                DisconnectReason::SlowConsumer
            }
            EnqueueError::Closed => DisconnectReason::WriterClosed,
        };
        let _ = self.remove(identity, reason);
    }

    fn remove(&self, identity: &Identity, reason: DisconnectReason) -> Result<(), RegistryError> {
        let handle = self.registry.remove(identity)?;
        handle.close();
        let rooms = self.rooms.leave_all(identity);
        if !rooms.is_empty() {
            debug!(%identity, ?rooms, "dropped room memberships");
        }
        self.events.emit(RelayEvent::Disconnected {
            identity: identity.clone(),
            reason,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::{Outbox, outbound_channel},
        events::TracingSink,
    };

    fn start() -> (HubHandle, Arc<Registry>, Arc<RoomManager>) {
        let events: Arc<dyn EventSink> = Arc::new(TracingSink::new());
        let registry = Arc::new(Registry::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&events)));
        let (hub, _task) = Hub::spawn(Arc::clone(&registry), Arc::clone(&rooms), events, 16);
        (hub, registry, rooms)
    }

    async fn connect(hub: &HubHandle, name: &str, capacity: usize) -> Outbox {
        let (handle, outbox) = outbound_channel(capacity);
        hub.register(name.into(), Arc::new(handle))
            .await
            .expect("register");
        outbox
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (hub, registry, _) = start();
        let _alice = connect(&hub, "alice", 4).await;

        let (handle, _outbox) = outbound_channel(4);
        let result = hub.register("alice".into(), Arc::new(handle)).await;
        assert_eq!(
            result,
            Err(HubError::Registry(RegistryError::AlreadyExists(
                "alice".into()
            )))
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (hub, registry, rooms) = start();
        let mut alice = connect(&hub, "alice", 4).await;
        rooms.join("r1", &"alice".into()).expect("join");

        hub.unregister("alice".into()).await.expect("first unregister");
        assert!(matches!(
            hub.unregister("alice".into()).await,
            Err(HubError::Registry(RegistryError::NotFound(_)))
        ));
        assert!(registry.is_empty());
        assert!(!rooms.room_exists("r1"));
        assert_eq!(alice.recv().await, None);
    }

    #[tokio::test]
    async fn direct_delivery_to_full_queue_sheds_recipient() {
        let (hub, registry, _) = start();
        let _alice = connect(&hub, "alice", 1).await;

        hub.deliver("alice".into(), Bytes::from_static(b"1"))
            .await
            .expect("first delivery fits");
        assert_eq!(
            hub.deliver("alice".into(), Bytes::from_static(b"2")).await,
            Err(HubError::Shed("alice".into()))
        );
        assert!(!registry.contains(&"alice".into()));
    }

    #[tokio::test]
    async fn hub_stops_when_handles_drop() {
        let events: Arc<dyn EventSink> = Arc::new(TracingSink::new());
        let registry = Arc::new(Registry::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&events)));
        let (hub, task) = Hub::spawn(registry, rooms, events, 4);

        assert!(hub.is_running());
        drop(hub);
        task.await.expect("hub task exits cleanly");
    }
}
