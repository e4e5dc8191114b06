//! Job control for pause/resume/cancel: per-job gates and the registry of live gates.
//!
//! Engines only expose a periodic progress callback, so control is cooperative.
//! Each running job gets a `ControlGate`; the job's progress callback calls
//! `checkpoint()` on every tick, which blocks while paused and reports
//! cancellation so the engine can unwind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use crate::job::JobId;

/// Error returned from a checkpoint once the job has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobAborted;

impl std::fmt::Display for JobAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job cancelled by operator")
    }
}

impl std::error::Error for JobAborted {}

/// State of a control gate. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Running,
    Paused,
    Cancelled,
}

/// Cooperative pause/resume/cancel primitive for one execution.
#[derive(Debug)]
pub struct ControlGate {
    state: Mutex<GateState>,
    wake: Condvar,
}

impl Default for ControlGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Running),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> GateState {
        *self.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == GateState::Cancelled
    }

    /// Running -> Paused. Takes effect at the next checkpoint. Returns true if the state changed.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        if *state == GateState::Running {
            *state = GateState::Paused;
            true
        } else {
            false
        }
    }

    /// Paused -> Running; no-op otherwise. Returns true if the state changed.
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if *state == GateState::Paused {
            *state = GateState::Running;
            self.wake.notify_all();
            true
        } else {
            false
        }
    }

    /// Move to `Cancelled` and release anything blocked in `checkpoint`.
    pub fn cancel(&self) {
        let mut state = self.lock();
        *state = GateState::Cancelled;
        self.wake.notify_all();
    }

    /// Called from the engine's progress callback. Blocks while paused; returns
    /// `Err(JobAborted)` if the gate is (or becomes) cancelled.
    pub fn checkpoint(&self) -> Result<(), JobAborted> {
        let mut state = self.lock();
        while *state == GateState::Paused {
            state = self
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match *state {
            GateState::Cancelled => Err(JobAborted),
            _ => Ok(()),
        }
    }
}

/// Shared registry of job id -> control gate for every job that is currently running.
/// The orchestrator registers a gate on admission and drops it when the worker finishes.
#[derive(Default)]
pub struct JobControl {
    gates: RwLock<HashMap<JobId, Arc<ControlGate>>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job and return its gate.
    pub fn register(&self, job_id: JobId) -> Arc<ControlGate> {
        let gate = Arc::new(ControlGate::new());
        self.gates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, Arc::clone(&gate));
        gate
    }

    /// Unregister a job (call when its worker finishes, whatever the outcome).
    pub fn unregister(&self, job_id: JobId) {
        self.gates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    pub fn get(&self, job_id: JobId) -> Option<Arc<ControlGate>> {
        self.gates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.get(job_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.gates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every registered job (shutdown path). Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let gates = self.gates.read().unwrap_or_else(PoisonError::into_inner);
        for gate in gates.values() {
            gate.cancel();
        }
        gates.len()
    }
}

/// Default path for the control socket (same XDG state dir as the queue file).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("fetchq")?
        .get_state_home()
        .join("fetchq");
    Ok(dir.join("control.sock"))
}
