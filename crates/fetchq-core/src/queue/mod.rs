//! The ordered job queue, its durable mirror, and change notifications.

mod persist;
mod store;

#[cfg(test)]
mod tests;

pub use persist::QueueFile;
pub use store::QueueStore;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::job::{JobId, JobRecord};

/// Change notification for observers (CLI status, UIs).
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A record was added or changed; carries its new state.
    Updated(JobRecord),
    /// A record left the queue.
    Removed(JobId),
}

/// Queue store shared between the control loop and worker threads.
///
/// Workers hold the write lock only long enough to apply one progress tick.
#[derive(Debug, Clone, Default)]
pub struct SharedQueue(Arc<RwLock<QueueStore>>);

impl SharedQueue {
    pub fn new(store: QueueStore) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, QueueStore> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, QueueStore> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.read().snapshot()
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.read().get(id).cloned()
    }
}
