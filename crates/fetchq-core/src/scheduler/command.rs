//! Operator commands, in a serializable form shared by the control loop, the
//! control socket, and offline queue editing.

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::{JobId, JobRecord, NewJob};
use crate::queue::QueueStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Enqueue { job: NewJob },
    EnqueueBatch { jobs: Vec<NewJob> },
    Remove { ids: Vec<JobId> },
    Reorder { id: JobId, delta: i64 },
    Pause { id: JobId },
    Resume { id: JobId },
    Cancel { id: JobId },
    Retry { ids: Vec<JobId> },
    RetryAllFailed,
    Schedule { id: JobId, at: i64 },
    StartAll,
    ClearCompleted,
    Status,
}

impl Command {
    /// Needs live workers (control gates or admission), so it cannot be applied
    /// to a queue file alone.
    pub fn needs_orchestrator(&self) -> bool {
        matches!(
            self,
            Command::Pause { .. } | Command::Resume { .. } | Command::Cancel { .. } | Command::StartAll
        )
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Command::Status)
    }

    /// The returned records have left the queue.
    pub fn removes_records(&self) -> bool {
        matches!(self, Command::Remove { .. } | Command::ClearCompleted)
    }

    /// Apply a queue-editing command to `store`. Returns the records it touched
    /// (all records for `Status`). Commands that need running workers return
    /// `QueueError::Stopped`.
    pub fn apply(&self, store: &mut QueueStore, now: i64) -> Result<Vec<JobRecord>, QueueError> {
        match self {
            Command::Enqueue { job } => Ok(vec![store.enqueue(job.clone(), now)]),
            Command::EnqueueBatch { jobs } => Ok(store.enqueue_batch(jobs.clone(), now)),
            Command::Remove { ids } => store.remove(ids),
            Command::Reorder { id, delta } => {
                store.reorder(*id, *delta)?;
                Ok(store.get(*id).cloned().into_iter().collect())
            }
            Command::Retry { ids } => store.retry(ids),
            Command::RetryAllFailed => Ok(store.retry_all_failed()),
            Command::Schedule { id, at } => Ok(vec![store.schedule(*id, *at, now)?]),
            Command::ClearCompleted => Ok(store.clear_completed()),
            Command::Status => Ok(store.snapshot()),
            Command::Pause { .. }
            | Command::Resume { .. }
            | Command::Cancel { .. }
            | Command::StartAll => Err(QueueError::Stopped),
        }
    }
}

/// Job state as shown to operators: the record plus its runtime-only fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub record: JobRecord,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        Self {
            paused: record.is_paused(),
            transfer_rate: record.transfer_rate(),
            eta_secs: record.eta_secs(),
            record,
        }
    }
}

/// One response line on the control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Ok { jobs: Vec<JobView> },
    Err { message: String },
}

impl Reply {
    pub fn from_result(result: Result<Vec<JobRecord>, QueueError>) -> Self {
        match result {
            Ok(records) => Reply::Ok {
                jobs: records.into_iter().map(JobView::from).collect(),
            },
            Err(e) => Reply::Err {
                message: e.to_string(),
            },
        }
    }
}
