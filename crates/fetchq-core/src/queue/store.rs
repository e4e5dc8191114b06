//! In-memory ordered queue of job records.
//!
//! Order is admission priority: the first `Queued` record is admitted first.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::QueueError;
use crate::failure::JobError;
use crate::job::{JobId, JobRecord, JobStatus, NewJob, ProgressUpdate};

/// Ordered collection of job records. Not synchronized; see `SharedQueue`.
#[derive(Debug, Clone)]
pub struct QueueStore {
    jobs: Vec<JobRecord>,
    next_id: JobId,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
        }
    }

    /// Build a store from records read from disk, repairing what needs repair.
    /// Duplicate ids (hand-edited files) are given fresh ids.
    pub fn from_records(records: Vec<JobRecord>) -> Self {
        let mut next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(records.len());
        for mut record in records {
            if !seen.insert(record.id) {
                tracing::warn!(id = record.id, new_id = next_id, "duplicate job id in queue file");
                record.id = next_id;
                next_id += 1;
                seen.insert(record.id);
            }
            if record.normalize_loaded() {
                tracing::warn!(id = record.id, status = %record.status(), "repaired job record on load");
            }
            jobs.push(record);
        }
        Self { jobs, next_id }
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.jobs
    }

    /// Owned copy of every record, in queue order.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.jobs.clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn position(&self, id: JobId) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == id)
    }

    fn get_mut(&mut self, id: JobId) -> Result<&mut JobRecord, QueueError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    fn ensure_known(&self, ids: &[JobId]) -> Result<(), QueueError> {
        match ids.iter().find(|id| self.get(**id).is_none()) {
            Some(id) => Err(QueueError::NotFound(*id)),
            None => Ok(()),
        }
    }

    /// Append a new job at the end of the queue.
    pub fn enqueue(&mut self, job: NewJob, now: i64) -> JobRecord {
        let record = JobRecord::new(self.next_id, job, now);
        self.next_id += 1;
        self.jobs.push(record.clone());
        record
    }

    pub fn enqueue_batch(&mut self, jobs: Vec<NewJob>, now: i64) -> Vec<JobRecord> {
        jobs.into_iter().map(|j| self.enqueue(j, now)).collect()
    }

    /// Remove the given jobs. Fails without removing anything if an id is unknown.
    pub fn remove(&mut self, ids: &[JobId]) -> Result<Vec<JobRecord>, QueueError> {
        self.ensure_known(ids)?;
        let (removed, kept) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|j| ids.contains(&j.id));
        self.jobs = kept;
        Ok(removed)
    }

    /// Move a job `delta` positions (negative = towards the front), clamped to the
    /// queue bounds. Returns the new position.
    pub fn reorder(&mut self, id: JobId, delta: i64) -> Result<usize, QueueError> {
        let from = self.position(id).ok_or(QueueError::NotFound(id))?;
        let last = self.jobs.len() as i64 - 1;
        let to = (from as i64 + delta).clamp(0, last) as usize;
        if to != from {
            let record = self.jobs.remove(from);
            self.jobs.insert(to, record);
        }
        Ok(to)
    }

    pub fn schedule(&mut self, id: JobId, at: i64, now: i64) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        record.schedule(at, now)?;
        Ok(record.clone())
    }

    /// Promote every `Scheduled` record whose time has come. Returns the promoted ids.
    pub fn promote_due(&mut self, now: i64) -> Vec<JobId> {
        self.jobs
            .iter_mut()
            .filter_map(|j| j.promote_if_due(now).then_some(j.id))
            .collect()
    }

    /// Reset the given `Error`/`Cancelled` jobs to `Queued`. Others are left alone.
    pub fn retry(&mut self, ids: &[JobId]) -> Result<Vec<JobRecord>, QueueError> {
        self.ensure_known(ids)?;
        Ok(self
            .jobs
            .iter_mut()
            .filter(|j| ids.contains(&j.id))
            .filter_map(|j| j.reset_for_retry().then(|| j.clone()))
            .collect())
    }

    pub fn retry_all_failed(&mut self) -> Vec<JobRecord> {
        self.jobs
            .iter_mut()
            .filter_map(|j| j.reset_for_retry().then(|| j.clone()))
            .collect()
    }

    /// Drop every finished record (`Complete`, `Error`, `Cancelled`).
    pub fn clear_completed(&mut self) -> Vec<JobRecord> {
        let (removed, kept) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|j| j.status().is_terminal());
        self.jobs = kept;
        removed
    }

    /// First `Queued` record in queue order.
    pub fn next_eligible(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|j| j.status() == JobStatus::Queued)
            .map(|j| j.id)
    }

    pub fn active_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_active()).count()
    }

    pub fn count_with(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status() == status).count()
    }

    pub(crate) fn admit(&mut self, id: JobId) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        record.admit()?;
        Ok(record.clone())
    }

    /// Apply a progress tick. Returns the updated record if anything changed.
    pub(crate) fn apply_progress(
        &mut self,
        id: JobId,
        update: &ProgressUpdate,
    ) -> Option<JobRecord> {
        let record = self.jobs.iter_mut().find(|j| j.id == id)?;
        record.apply_progress(update).then(|| record.clone())
    }

    pub(crate) fn set_paused(&mut self, id: JobId, paused: bool) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        if !record.is_active() {
            return Err(QueueError::NotActive(id));
        }
        record.set_paused(paused);
        Ok(record.clone())
    }

    pub(crate) fn complete(&mut self, id: JobId, artifact: PathBuf) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        record.complete(artifact)?;
        Ok(record.clone())
    }

    pub(crate) fn fail(&mut self, id: JobId, error: JobError) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        record.fail(error)?;
        Ok(record.clone())
    }

    pub(crate) fn cancel(&mut self, id: JobId) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        record.mark_cancelled()?;
        Ok(record.clone())
    }

    pub(crate) fn requeue_interrupted(&mut self, id: JobId) -> Result<JobRecord, QueueError> {
        let record = self.get_mut(id)?;
        record.requeue_interrupted();
        Ok(record.clone())
    }
}
