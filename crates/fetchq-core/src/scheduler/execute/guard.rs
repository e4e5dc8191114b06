//! RAII guard that reports a worker's outcome to the control loop exactly once.

use tokio::sync::mpsc::UnboundedSender;

use super::{Finished, Outcome};
use crate::failure::{FailureKind, JobError};
use crate::job::JobId;

/// Posts `Finished` when dropped, so a panicking engine still frees its slot.
pub(super) struct FinishGuard {
    id: JobId,
    tx: Option<UnboundedSender<Finished>>,
}

impl FinishGuard {
    pub(super) fn new(id: JobId, tx: UnboundedSender<Finished>) -> Self {
        Self { id, tx: Some(tx) }
    }

    pub(super) fn finish(mut self, outcome: Outcome) {
        self.post(outcome);
    }

    fn post(&mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            // The control loop is gone during a hard shutdown; nothing left to notify.
            let _ = tx.send(Finished {
                id: self.id,
                outcome,
            });
        }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::error!(job = self.id, "worker exited without an outcome");
            self.post(Outcome::Failed(JobError {
                kind: FailureKind::EngineFailure,
                message: "The download engine crashed.".to_string(),
            }));
        }
    }
}
