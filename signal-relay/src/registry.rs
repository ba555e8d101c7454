//! Live connections keyed by identity.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;

use crate::{connection::SharedHandle, identity::Identity};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity must not be empty")]
    InvalidIdentity,
    #[error("identity '{0}' is already registered")]
    AlreadyExists(Identity),
    #[error("identity '{0}' is not registered")]
    NotFound(Identity),
}

/// Thread-safe identity → handle map.
///
/// Mutations take the write lock, lookups the read lock. Locks only guard map
/// bookkeeping: enqueueing onto a handle happens after the snapshot is taken.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<Identity, SharedHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, identity: Identity, handle: SharedHandle) -> Result<(), RegistryError> {
        if identity.is_empty() {
            return Err(RegistryError::InvalidIdentity);
        }

        let mut entries = self.entries.write();
        if entries.contains_key(&identity) {
            return Err(RegistryError::AlreadyExists(identity));
        }
        entries.insert(identity, handle);
        Ok(())
    }

    /// Removes the entry and hands back its handle so the caller can close it.
    pub fn remove(&self, identity: &Identity) -> Result<SharedHandle, RegistryError> {
        self.entries
            .write()
            .remove(identity)
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))
    }

    pub fn get(&self, identity: &Identity) -> Result<SharedHandle, RegistryError> {
        self.entries
            .read()
            .get(identity)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.read().contains_key(identity)
    }

    /// Snapshot of every handle. The registry may change as soon as this returns.
    pub fn list(&self) -> Vec<SharedHandle> {
        self.entries.read().values().map(Arc::clone).collect()
    }

    /// Snapshot of every entry, used by fan-out so evictions can name their target.
    pub fn snapshot(&self) -> Vec<(Identity, SharedHandle)> {
        self.entries
            .read()
            .iter()
            .map(|(identity, handle)| (identity.clone(), Arc::clone(handle)))
            .collect()
    }

    /// Registered identities in sorted order.
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.entries.read().keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
