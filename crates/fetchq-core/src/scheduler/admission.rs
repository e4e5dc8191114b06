//! Admission: move the first eligible job into execution while capacity allows.

use crate::engine::Engine;
use crate::failure::JobError;
use crate::job::JobRecord;
use crate::queue::SharedQueue;
use crate::storage;

/// Result of one admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Admission {
    /// Now `Starting`; the caller must start its execution.
    Admitted(JobRecord),
    /// Failed before `Starting` (not enough free space); try the next one.
    Refused(JobRecord),
    /// Capacity is used up.
    Full,
    /// No `Queued` record left.
    Idle,
}

/// Admission limits, taken from config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) capacity: usize,
    pub(crate) min_free_bytes: u64,
}

/// Try to admit the first `Queued` record. `running` counts live workers, which
/// can exceed the active records in the store when a running job was removed.
pub(crate) fn admit_next(
    queue: &SharedQueue,
    engine: &dyn Engine,
    running: usize,
    limits: Limits,
) -> Admission {
    if running >= limits.capacity {
        return Admission::Full;
    }
    let candidate = {
        let store = queue.read();
        store
            .next_eligible()
            .and_then(|id| store.get(id).cloned())
    };
    let Some(record) = candidate else {
        return Admission::Idle;
    };

    if limits.min_free_bytes > 0 {
        if let Some(dir) = engine.destination(&record.config) {
            if let Some(detail) = storage::free_space_shortfall(&dir, limits.min_free_bytes) {
                tracing::info!(job = record.id, "refused: {}", detail);
                return match queue
                    .write()
                    .fail(record.id, JobError::insufficient_storage(detail))
                {
                    Ok(failed) => Admission::Refused(failed),
                    Err(e) => {
                        tracing::warn!(job = record.id, "could not refuse job: {}", e);
                        Admission::Idle
                    }
                };
            }
        }
    }

    match queue.write().admit(record.id) {
        Ok(admitted) => {
            tracing::debug!(job = admitted.id, running = running + 1, "admitted");
            Admission::Admitted(admitted)
        }
        Err(e) => {
            tracing::warn!(job = record.id, "could not admit job: {}", e);
            Admission::Idle
        }
    }
}
