//! Job records: the persisted unit of work and its lifecycle.

mod progress;
mod status;

pub use progress::ProgressUpdate;
pub use status::JobStatus;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::QueueError;
use crate::failure::JobError;

/// Job identifier, assigned by the queue store and never reused within a queue file.
pub type JobId = u64;

/// Current wall-clock time as Unix seconds. Activation times are wall-clock values.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Parameters for a job that has not been enqueued yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Activation time; only honoured when it lies in the future.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,
}

impl NewJob {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            title: None,
            config: serde_json::Value::Null,
            scheduled_at: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn scheduled_at(mut self, at: i64) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Durable description and state of one queued unit of work.
///
/// The lifecycle fields are only changed through the methods below so that
/// `scheduled_at.is_some() == (status == Scheduled)` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Opaque resource locator handed to the engine.
    #[serde(rename = "url")]
    pub target: String,
    #[serde(default)]
    pub title: String,
    /// Opaque engine configuration; never interpreted by the queue.
    #[serde(default)]
    pub config: serde_json::Value,
    status: JobStatus,
    #[serde(default)]
    progress: f64,
    #[serde(
        rename = "scheduled_time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    scheduled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
    #[serde(skip)]
    paused: bool,
    #[serde(skip)]
    transfer_rate: Option<f64>,
    #[serde(skip)]
    eta_secs: Option<f64>,
}

impl JobRecord {
    /// Build a record from `job`. It starts `Scheduled` if its activation time
    /// is after `now`, otherwise `Queued`.
    pub fn new(id: JobId, job: NewJob, now: i64) -> Self {
        let scheduled_at = job.scheduled_at.filter(|at| *at > now);
        let status = if scheduled_at.is_some() {
            JobStatus::Scheduled
        } else {
            JobStatus::Queued
        };
        let title = job
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| job.target.clone());
        Self {
            id,
            target: job.target,
            title,
            config: job.config,
            status,
            progress: 0.0,
            scheduled_at,
            error: None,
            artifact: None,
            paused: false,
            transfer_rate: None,
            eta_secs: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Percent complete in [0, 100].
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn scheduled_at(&self) -> Option<i64> {
        self.scheduled_at
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Latest transfer rate in bytes per second, while active.
    pub fn transfer_rate(&self) -> Option<f64> {
        self.transfer_rate
    }

    /// Latest estimate of seconds remaining, while active.
    pub fn eta_secs(&self) -> Option<f64> {
        self.eta_secs
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// `scheduled_at` is present exactly when the status is `Scheduled`.
    pub fn schedule_invariant_holds(&self) -> bool {
        self.scheduled_at.is_some() == (self.status == JobStatus::Scheduled)
    }

    /// Move to `next`, clearing whatever state does not belong to it.
    fn transition(&mut self, next: JobStatus) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next != JobStatus::Scheduled {
            self.scheduled_at = None;
        }
        if next != JobStatus::Error {
            self.error = None;
        }
        if next != JobStatus::Complete {
            self.artifact = None;
        }
        if !next.is_active() {
            self.paused = false;
            self.transfer_rate = None;
            self.eta_secs = None;
        }
        Ok(())
    }

    /// Queued -> Starting. A fresh attempt always starts from zero.
    pub(crate) fn admit(&mut self) -> Result<(), QueueError> {
        self.transition(JobStatus::Starting)?;
        self.progress = 0.0;
        Ok(())
    }

    /// Queued|Scheduled -> Scheduled at `at`. `at` must be after `now`.
    pub(crate) fn schedule(&mut self, at: i64, now: i64) -> Result<(), QueueError> {
        if at <= now {
            return Err(QueueError::ScheduleInPast { at });
        }
        self.transition(JobStatus::Scheduled)?;
        self.scheduled_at = Some(at);
        Ok(())
    }

    /// Scheduled -> Queued once the activation time has passed. Returns true if promoted.
    pub(crate) fn promote_if_due(&mut self, now: i64) -> bool {
        match (self.status, self.scheduled_at) {
            (JobStatus::Scheduled, Some(at)) if at <= now => {
                self.transition(JobStatus::Queued).is_ok()
            }
            _ => false,
        }
    }

    /// Error|Cancelled -> Queued with progress reset. Returns true if the record was reset.
    pub(crate) fn reset_for_retry(&mut self) -> bool {
        if !self.status.is_retryable() {
            return false;
        }
        let ok = self.transition(JobStatus::Queued).is_ok();
        if ok {
            self.progress = 0.0;
        }
        ok
    }

    /// Active -> Queued, dropping the interrupted attempt's progress.
    pub(crate) fn requeue_interrupted(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        let ok = self.transition(JobStatus::Queued).is_ok();
        if ok {
            self.progress = 0.0;
        }
        ok
    }

    pub(crate) fn complete(&mut self, artifact: PathBuf) -> Result<(), QueueError> {
        self.transition(JobStatus::Complete)?;
        self.progress = 100.0;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: JobError) -> Result<(), QueueError> {
        self.transition(JobStatus::Error)?;
        self.error = Some(error);
        Ok(())
    }

    pub(crate) fn mark_cancelled(&mut self) -> Result<(), QueueError> {
        self.transition(JobStatus::Cancelled)
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        if self.status.is_active() {
            self.paused = paused;
            if paused {
                self.transfer_rate = None;
                self.eta_secs = None;
            }
        }
    }

    /// Apply a progress tick from the running engine. Ignored unless the job is active.
    ///
    /// Status only moves forward (Starting -> Downloading -> Merging) and the
    /// percentage never decreases within one attempt. Returns true if anything changed.
    pub(crate) fn apply_progress(&mut self, update: &ProgressUpdate) -> bool {
        if !self.status.is_active() {
            return false;
        }
        let before = (self.status, self.progress, self.transfer_rate, self.eta_secs);
        let next = match (self.status, update.status) {
            (JobStatus::Starting, JobStatus::Downloading) => JobStatus::Downloading,
            (JobStatus::Starting | JobStatus::Downloading, JobStatus::Merging) => {
                JobStatus::Merging
            }
            (current, _) => current,
        };
        if next != self.status {
            let moved = self.transition(next);
            debug_assert!(moved.is_ok(), "active status moves forward: {:?}", moved);
        }
        if self.status == JobStatus::Downloading {
            if let Some(percent) = update.percent {
                self.progress = self.progress.max(percent.clamp(0.0, 100.0));
            }
        }
        self.transfer_rate = update.transfer_rate;
        self.eta_secs = update.estimated_remaining;
        before != (self.status, self.progress, self.transfer_rate, self.eta_secs)
    }

    /// Repair a record read from disk. Returns true if anything was changed.
    ///
    /// Records left in an active status by a process that died mid-run go back
    /// to `Queued`; a stray or missing activation time is reconciled with the status.
    pub(crate) fn normalize_loaded(&mut self) -> bool {
        let mut changed = false;
        if self.status.is_active() {
            self.status = JobStatus::Queued;
            self.progress = 0.0;
            changed = true;
        }
        match (self.status, self.scheduled_at) {
            (JobStatus::Scheduled, None) => {
                self.status = JobStatus::Queued;
                changed = true;
            }
            (status, Some(_)) if status != JobStatus::Scheduled => {
                self.scheduled_at = None;
                changed = true;
            }
            _ => {}
        }
        if self.status != JobStatus::Error && self.error.is_some() {
            self.error = None;
            changed = true;
        }
        if self.status != JobStatus::Complete && self.artifact.is_some() {
            self.artifact = None;
            changed = true;
        }
        if !(0.0..=100.0).contains(&self.progress) {
            self.progress = self.progress.clamp(0.0, 100.0);
            changed = true;
        }
        if self.title.is_empty() {
            self.title = self.target.clone();
        }
        changed
    }
}
