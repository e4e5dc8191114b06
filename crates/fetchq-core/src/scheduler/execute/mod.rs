//! Execution handle: one engine invocation bound to one job record.
//!
//! Runs on a blocking worker thread. Every progress tick passes the job's
//! control gate first, then lands in the shared queue store; the terminal
//! outcome is posted back to the control loop, which owns the slot.

mod guard;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::control::{ControlGate, JobAborted};
use crate::engine::{Engine, EngineOutcome, EngineRequest, RawProgress};
use crate::failure::{FailureKind, JobError};
use crate::job::{JobId, JobRecord, ProgressUpdate};
use crate::queue::{QueueEvent, SharedQueue};

use guard::FinishGuard;

/// Translated terminal result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Complete(PathBuf),
    Failed(JobError),
    Cancelled,
}

/// Message from a worker to the control loop.
#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) id: JobId,
    pub(crate) outcome: Outcome,
}

/// Map the engine's result. A cancelled gate wins over whatever the engine
/// returned, so a cancel that races the last tick still ends as `Cancelled`.
pub(crate) fn resolve(outcome: EngineOutcome, cancelled: bool) -> Outcome {
    if cancelled {
        return Outcome::Cancelled;
    }
    match outcome {
        EngineOutcome::Success(path) => Outcome::Complete(path),
        EngineOutcome::Failure(raw) => Outcome::Failed(JobError::from_engine(&raw)),
        EngineOutcome::Aborted => Outcome::Failed(JobError {
            kind: FailureKind::EngineFailure,
            message: "The download engine stopped without being cancelled.".to_string(),
        }),
    }
}

/// Everything a worker needs; moved onto the worker thread.
pub(crate) struct ExecutionHandle {
    id: JobId,
    target: String,
    config: serde_json::Value,
    gate: Arc<ControlGate>,
    engine: Arc<dyn Engine>,
    queue: SharedQueue,
    events: broadcast::Sender<QueueEvent>,
    dirty: Arc<AtomicBool>,
}

impl ExecutionHandle {
    pub(crate) fn new(
        record: &JobRecord,
        gate: Arc<ControlGate>,
        engine: Arc<dyn Engine>,
        queue: SharedQueue,
        events: broadcast::Sender<QueueEvent>,
        dirty: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: record.id,
            target: record.target.clone(),
            config: record.config.clone(),
            gate,
            engine,
            queue,
            events,
            dirty,
        }
    }

    /// Checkpoint, normalize, and store one progress tick.
    fn on_progress(&self, raw: RawProgress) -> Result<(), JobAborted> {
        self.gate.checkpoint()?;
        let update = ProgressUpdate::from_raw(&raw);
        let changed = self.queue.write().apply_progress(self.id, &update);
        if let Some(record) = changed {
            self.dirty.store(true, Ordering::Release);
            let _ = self.events.send(QueueEvent::Updated(record));
        }
        Ok(())
    }

    /// Drive the engine to completion on the current thread.
    pub(crate) fn run(&self) -> Outcome {
        let request = EngineRequest {
            target: &self.target,
            config: &self.config,
        };
        let outcome = self
            .engine
            .invoke(request, &mut |raw: RawProgress| self.on_progress(raw));
        tracing::debug!(job = self.id, ?outcome, "engine returned");
        resolve(outcome, self.gate.is_cancelled())
    }

    /// Run on a blocking thread and post `Finished` to `tx`, even on panic.
    pub(crate) fn spawn(self, tx: mpsc::UnboundedSender<Finished>) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            let guard = FinishGuard::new(self.id, tx);
            let outcome = self.run();
            guard.finish(outcome);
        })
    }
}
