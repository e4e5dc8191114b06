//! Job status and the transitions allowed between statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job record.
///
/// Serialized with its variant name (`"Queued"`, `"Complete"`, ...) in the queue file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Eligible for admission.
    Queued,
    /// Waiting for its activation time; not eligible for admission.
    Scheduled,
    /// Admitted; the engine has been invoked but no data has moved yet.
    Starting,
    /// The engine is transferring data.
    Downloading,
    /// The engine is post-processing (progress percentage is not meaningful).
    Merging,
    Complete,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Merging => "merging",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that occupy an admission slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Starting | JobStatus::Downloading | JobStatus::Merging
        )
    }

    /// Complete, Error and Cancelled. Error and Cancelled can still be retried.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Besides the operator-visible lifecycle this also admits two internal moves:
    /// `Queued -> Error` (admission refused for lack of disk space) and
    /// `active -> Queued` (work interrupted by shutdown or a crash, restarted later).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Starting) | (Queued, Scheduled) | (Queued, Error) => true,
            (Scheduled, Queued) | (Scheduled, Scheduled) => true,
            (Starting, Downloading) | (Starting, Merging) | (Starting, Complete) => true,
            (Downloading, Merging) | (Downloading, Complete) => true,
            (Merging, Complete) => true,
            (from, Error) | (from, Cancelled) | (from, Queued) if from.is_active() => true,
            (Error, Queued) | (Cancelled, Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
