//! The control loop: sole owner of admission decisions, the running-worker
//! table, the activation and flush ticks, and every write of the queue file.
//!
//! Callers talk to it through [`OrchestratorHandle`]; workers report back with
//! `Finished` messages. Commands never wait for a job to finish.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::admission::{self, Admission, Limits};
use super::command::Command;
use super::execute::{ExecutionHandle, Finished, Outcome};
use super::timer;
use crate::config::FetchqConfig;
use crate::control::JobControl;
use crate::engine::Engine;
use crate::error::QueueError;
use crate::job::{unix_timestamp, JobId, JobRecord, NewJob};
use crate::queue::{QueueEvent, QueueFile, QueueStore, SharedQueue};

const EVENT_CAPACITY: usize = 256;
const REQUEST_CAPACITY: usize = 64;

type Reply = oneshot::Sender<Result<Vec<JobRecord>, QueueError>>;

enum Msg {
    Command { command: Command, reply: Reply },
    Shutdown { done: oneshot::Sender<()> },
}

/// Cloneable front end to a running control loop.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Msg>,
    queue: SharedQueue,
    events: broadcast::Sender<QueueEvent>,
}

impl OrchestratorHandle {
    /// Send any command and wait for the control loop to apply it.
    pub async fn execute(&self, command: Command) -> Result<Vec<JobRecord>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Command { command, reply })
            .await
            .map_err(|_| QueueError::Stopped)?;
        rx.await.map_err(|_| QueueError::Stopped)?
    }

    async fn execute_one(&self, command: Command) -> Result<JobRecord, QueueError> {
        self.execute(command)
            .await?
            .into_iter()
            .next()
            .ok_or(QueueError::Stopped)
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<JobRecord, QueueError> {
        self.execute_one(Command::Enqueue { job }).await
    }

    pub async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>, QueueError> {
        self.execute(Command::EnqueueBatch { jobs }).await
    }

    /// Remove jobs; running ones are cancelled first. Returns the removed records.
    pub async fn remove(&self, ids: Vec<JobId>) -> Result<Vec<JobRecord>, QueueError> {
        self.execute(Command::Remove { ids }).await
    }

    pub async fn reorder(&self, id: JobId, delta: i64) -> Result<JobRecord, QueueError> {
        self.execute_one(Command::Reorder { id, delta }).await
    }

    pub async fn pause(&self, id: JobId) -> Result<JobRecord, QueueError> {
        self.execute_one(Command::Pause { id }).await
    }

    pub async fn resume(&self, id: JobId) -> Result<JobRecord, QueueError> {
        self.execute_one(Command::Resume { id }).await
    }

    /// Request cancellation. The record turns `Cancelled` once the worker unwinds.
    pub async fn cancel(&self, id: JobId) -> Result<JobRecord, QueueError> {
        self.execute_one(Command::Cancel { id }).await
    }

    pub async fn retry(&self, ids: Vec<JobId>) -> Result<Vec<JobRecord>, QueueError> {
        self.execute(Command::Retry { ids }).await
    }

    pub async fn retry_all_failed(&self) -> Result<Vec<JobRecord>, QueueError> {
        self.execute(Command::RetryAllFailed).await
    }

    pub async fn schedule(&self, id: JobId, at: i64) -> Result<JobRecord, QueueError> {
        self.execute_one(Command::Schedule { id, at }).await
    }

    /// Fill free capacity now. Returns the jobs that were admitted.
    pub async fn start_all(&self) -> Result<Vec<JobRecord>, QueueError> {
        self.execute(Command::StartAll).await
    }

    pub async fn clear_completed(&self) -> Result<Vec<JobRecord>, QueueError> {
        self.execute(Command::ClearCompleted).await
    }

    /// Read-only copy of the queue, in order.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.queue.snapshot()
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.queue.get(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Cancel running jobs, wait up to the grace period for them, persist, and stop.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Msg::Shutdown { done })
            .await
            .map_err(|_| QueueError::Stopped)?;
        rx.await.map_err(|_| QueueError::Stopped)
    }
}

/// Starts control loops.
pub struct Orchestrator;

impl Orchestrator {
    /// Spawn the control loop on the current tokio runtime. `file` is the durable
    /// mirror; `None` keeps the queue in memory only.
    pub fn spawn(
        cfg: &FetchqConfig,
        engine: Arc<dyn Engine>,
        store: QueueStore,
        file: Option<QueueFile>,
    ) -> OrchestratorHandle {
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let queue = SharedQueue::new(store);
        let control_loop =
            ControlLoop::new(cfg, engine, queue.clone(), file, events.clone(), finished_tx);
        tokio::spawn(control_loop.run(rx, finished_rx));
        OrchestratorHandle { tx, queue, events }
    }

    /// Load the queue file and spawn the control loop over it.
    pub fn load(
        cfg: &FetchqConfig,
        engine: Arc<dyn Engine>,
        file: QueueFile,
    ) -> anyhow::Result<OrchestratorHandle> {
        let store = file.load()?;
        tracing::info!(jobs = store.len(), path = %file.path().display(), "queue loaded");
        Ok(Self::spawn(cfg, engine, store, Some(file)))
    }
}

enum Signal {
    Pause,
    Resume,
    Cancel,
}

struct ControlLoop {
    cfg: FetchqConfig,
    limits: Limits,
    engine: Arc<dyn Engine>,
    queue: SharedQueue,
    control: JobControl,
    file: Option<QueueFile>,
    events: broadcast::Sender<QueueEvent>,
    /// Set by workers when progress changed since the last save.
    dirty: Arc<AtomicBool>,
    workers: HashMap<JobId, JoinHandle<()>>,
    /// Jobs the operator cancelled (as opposed to shutdown cancelling them).
    cancel_requested: HashSet<JobId>,
    finished_tx: mpsc::UnboundedSender<Finished>,
    shutting_down: bool,
}

impl ControlLoop {
    fn new(
        cfg: &FetchqConfig,
        engine: Arc<dyn Engine>,
        queue: SharedQueue,
        file: Option<QueueFile>,
        events: broadcast::Sender<QueueEvent>,
        finished_tx: mpsc::UnboundedSender<Finished>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            limits: Limits {
                capacity: cfg.capacity(),
                min_free_bytes: cfg.min_free_bytes,
            },
            engine,
            queue,
            control: JobControl::new(),
            file,
            events,
            dirty: Arc::new(AtomicBool::new(false)),
            workers: HashMap::new(),
            cancel_requested: HashSet::new(),
            finished_tx,
            shutting_down: false,
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Msg>,
        mut finished_rx: mpsc::UnboundedReceiver<Finished>,
    ) {
        self.on_schedule_tick();
        self.admit_all();
        self.persist();

        let mut schedule_tick = timer::ticker(self.cfg.schedule_tick());
        let mut flush_tick = timer::ticker(self.cfg.progress_flush());
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Msg::Command { command, reply }) => {
                        let result = self.handle(command);
                        let _ = reply.send(result);
                    }
                    Some(Msg::Shutdown { done }) => {
                        self.shutdown(&mut finished_rx).await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown(&mut finished_rx).await;
                        return;
                    }
                },
                Some(finished) = finished_rx.recv() => self.on_finished(finished),
                _ = schedule_tick.tick() => self.on_schedule_tick(),
                _ = flush_tick.tick() => self.flush_progress(),
            }
        }
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn persist(&self) {
        let Some(file) = &self.file else {
            return;
        };
        self.dirty.store(false, Ordering::Release);
        let records = self.queue.snapshot();
        if let Err(e) = file.save_records(&records) {
            tracing::warn!("failed to save queue: {:#}", e);
        }
    }

    fn flush_progress(&self) {
        if self.dirty.load(Ordering::Acquire) {
            self.persist();
        }
    }

    fn handle(&mut self, command: Command) -> Result<Vec<JobRecord>, QueueError> {
        tracing::debug!(?command, "command");
        let records = match &command {
            Command::Pause { id } => self.signal(*id, Signal::Pause)?,
            Command::Resume { id } => self.signal(*id, Signal::Resume)?,
            Command::Cancel { id } => self.signal(*id, Signal::Cancel)?,
            Command::Remove { ids } => self.remove(ids)?,
            Command::StartAll => return Ok(self.admit_all()),
            Command::Status => return Ok(self.queue.snapshot()),
            other => other.apply(&mut self.queue.write(), unix_timestamp())?,
        };
        if command.removes_records() {
            for record in &records {
                self.emit(QueueEvent::Removed(record.id));
            }
        } else {
            for record in &records {
                self.emit(QueueEvent::Updated(record.clone()));
            }
        }
        self.persist();
        self.admit_all();
        Ok(records)
    }

    fn signal(&mut self, id: JobId, signal: Signal) -> Result<Vec<JobRecord>, QueueError> {
        if self.queue.get(id).is_none() {
            return Err(QueueError::NotFound(id));
        }
        let gate = self.control.get(id).ok_or(QueueError::NotActive(id))?;
        // A cancelled gate ignores pause and resume; the record is left as is.
        let record = match signal {
            Signal::Pause if gate.pause() => {
                tracing::info!(job = id, "paused");
                self.queue.write().set_paused(id, true)?
            }
            Signal::Resume if gate.resume() => {
                tracing::info!(job = id, "resumed");
                self.queue.write().set_paused(id, false)?
            }
            Signal::Pause | Signal::Resume => {
                self.queue.get(id).ok_or(QueueError::NotFound(id))?
            }
            Signal::Cancel => {
                gate.cancel();
                self.cancel_requested.insert(id);
                tracing::info!(job = id, "cancel requested");
                self.queue.get(id).ok_or(QueueError::NotFound(id))?
            }
        };
        Ok(vec![record])
    }

    fn remove(&mut self, ids: &[JobId]) -> Result<Vec<JobRecord>, QueueError> {
        let removed = self.queue.write().remove(ids)?;
        for record in &removed {
            if let Some(gate) = self.control.get(record.id) {
                gate.cancel();
                self.cancel_requested.insert(record.id);
                tracing::info!(job = record.id, "cancelling removed job");
            }
        }
        Ok(removed)
    }

    /// Admit until capacity is full or nothing is eligible. Returns the admitted jobs.
    fn admit_all(&mut self) -> Vec<JobRecord> {
        if self.shutting_down {
            return Vec::new();
        }
        let mut admitted = Vec::new();
        let mut refused = false;
        loop {
            match admission::admit_next(
                &self.queue,
                self.engine.as_ref(),
                self.workers.len(),
                self.limits,
            ) {
                Admission::Admitted(record) => {
                    self.start(&record);
                    self.emit(QueueEvent::Updated(record.clone()));
                    admitted.push(record);
                }
                Admission::Refused(record) => {
                    refused = true;
                    self.emit(QueueEvent::Updated(record));
                }
                Admission::Full | Admission::Idle => break,
            }
        }
        if !admitted.is_empty() || refused {
            self.persist();
        }
        admitted
    }

    fn start(&mut self, record: &JobRecord) {
        tracing::info!(job = record.id, target = %record.target, "starting");
        let gate = self.control.register(record.id);
        let handle = ExecutionHandle::new(
            record,
            gate,
            Arc::clone(&self.engine),
            self.queue.clone(),
            self.events.clone(),
            Arc::clone(&self.dirty),
        );
        let worker = handle.spawn(self.finished_tx.clone());
        self.workers.insert(record.id, worker);
    }

    fn on_finished(&mut self, Finished { id, outcome }: Finished) {
        self.workers.remove(&id);
        self.control.unregister(id);
        let operator_cancel = self.cancel_requested.remove(&id);
        // An accepted cancel is final, even if the worker had already returned
        // a result when the request arrived.
        let outcome = if operator_cancel {
            Outcome::Cancelled
        } else {
            outcome
        };
        let applied = {
            let mut store = self.queue.write();
            match outcome {
                Outcome::Complete(artifact) => store.complete(id, artifact),
                Outcome::Failed(error) => store.fail(id, error),
                Outcome::Cancelled if self.shutting_down && !operator_cancel => {
                    store.requeue_interrupted(id)
                }
                Outcome::Cancelled => store.cancel(id),
            }
        };
        match applied {
            Ok(record) => {
                match record.error() {
                    Some(error) => tracing::info!(job = id, kind = %error.kind, "failed: {}", error.message),
                    None => tracing::info!(job = id, status = %record.status(), "finished"),
                }
                self.emit(QueueEvent::Updated(record));
            }
            Err(QueueError::NotFound(_)) => {
                tracing::debug!(job = id, "finished job was already removed");
            }
            Err(e) => tracing::warn!(job = id, "could not record outcome: {}", e),
        }
        self.persist();
        self.admit_all();
    }

    fn on_schedule_tick(&mut self) {
        let promoted = timer::promote_due(&self.queue, unix_timestamp());
        if promoted.is_empty() {
            return;
        }
        for record in promoted {
            tracing::info!(job = record.id, "scheduled job activated");
            self.emit(QueueEvent::Updated(record));
        }
        self.persist();
        self.admit_all();
    }

    async fn shutdown(&mut self, finished_rx: &mut mpsc::UnboundedReceiver<Finished>) {
        self.shutting_down = true;
        let signalled = self.control.cancel_all();
        tracing::info!(running = signalled, "shutting down");

        let grace = tokio::time::sleep(self.cfg.shutdown_grace());
        tokio::pin!(grace);
        while !self.workers.is_empty() {
            tokio::select! {
                Some(finished) = finished_rx.recv() => self.on_finished(finished),
                _ = &mut grace => {
                    tracing::warn!(
                        remaining = self.workers.len(),
                        "workers still running after grace period; partial files may remain"
                    );
                    break;
                }
            }
        }

        let stuck: Vec<JobId> = self.workers.keys().copied().collect();
        if !stuck.is_empty() {
            let mut store = self.queue.write();
            for id in stuck {
                let _ = store.requeue_interrupted(id);
            }
        }
        self.persist();
    }
}
