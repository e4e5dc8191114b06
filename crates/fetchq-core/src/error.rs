//! Errors returned by queue and orchestrator operations.

use thiserror::Error;

use crate::job::{JobId, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} is not running")]
    NotActive(JobId),

    #[error("scheduled time {at} is not in the future")]
    ScheduleInPast { at: i64 },

    #[error("orchestrator is not running")]
    Stopped,
}
