use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    connection::DEFAULT_QUEUE_CAPACITY,
    dispatcher::Dispatcher,
    events::EventSink,
    hub::{DEFAULT_HUB_CAPACITY, Hub, HubError, HubHandle},
    identity::Identity,
    message::Vocabulary,
    registry::{Registry, RegistryError},
    rooms::RoomManager,
};

/// Tunables of the relay core.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub queue_capacity: usize,
    pub hub_capacity: usize,
    pub vocabulary: Vocabulary,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            hub_capacity: DEFAULT_HUB_CAPACITY,
            vocabulary: Vocabulary::default(),
        }
    }
}

/// The wired-up core: registry, rooms, the running hub and a dispatcher on top.
pub struct Relay {
    registry: Arc<Registry>,
    rooms: Arc<RoomManager>,
    hub: HubHandle,
    dispatcher: Dispatcher,
    queue_capacity: usize,
    hub_task: JoinHandle<()>,
}

impl Relay {
    /// Spawns the hub task. Must be called from within a Tokio runtime.
    pub fn start(settings: RelaySettings, events: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(Registry::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&events)));
        let (hub, hub_task) = Hub::spawn(
            Arc::clone(&registry),
            Arc::clone(&rooms),
            events,
            settings.hub_capacity,
        );
        let dispatcher = Dispatcher::new(
            hub.clone(),
            Arc::clone(&registry),
            Arc::clone(&rooms),
            settings.vocabulary,
        );

        Self {
            registry,
            rooms,
            hub,
            dispatcher,
            queue_capacity: settings.queue_capacity,
            hub_task,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Tears a connection down. Returns `false` when the hub had already shed it.
    ///
    /// Room memberships are dropped either way: a shed connection may still
    /// have been joining rooms while its queue drained.
    pub async fn disconnect(&self, identity: &Identity) -> Result<bool, HubError> {
        match self.hub.unregister(identity.clone()).await {
            Ok(()) => Ok(true),
            Err(HubError::Registry(RegistryError::NotFound(_))) => {
                self.rooms.leave_all(identity);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.hub_task.is_finished() && self.hub.is_running()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.hub_task.abort();
    }
}
