//! Engine driven step by step from the test.
//!
//! Each invocation registers itself under its target and then waits for steps.
//! While idle it re-reports its last progress every few milliseconds, the way
//! a real transfer keeps calling its progress callback, so pause and cancel
//! take effect without any step from the test.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use fetchq_core::engine::{Engine, EngineOutcome, EngineRequest, ProgressCallback, RawProgress};

const HEARTBEAT: Duration = Duration::from_millis(10);

enum Step {
    Tick(RawProgress),
    Finish(EngineOutcome),
}

#[derive(Default)]
pub struct ManualEngine {
    running: Mutex<HashMap<String, Sender<Step>>>,
    started: Mutex<Vec<String>>,
    destination: Option<PathBuf>,
}

impl ManualEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `dest` as the output directory for the free-space check.
    pub fn writing_to(dest: PathBuf) -> Self {
        Self {
            destination: Some(dest),
            ..Self::default()
        }
    }

    /// Targets in the order the engine was invoked for them.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn is_running(&self, target: &str) -> bool {
        self.running.lock().unwrap().contains_key(target)
    }

    pub async fn wait_started(&self, target: &str) {
        for _ in 0..500 {
            if self.is_running(target) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never started {target}; started: {:?}", self.started());
    }

    fn send(&self, target: &str, step: Step) {
        let running = self.running.lock().unwrap();
        let tx = running
            .get(target)
            .unwrap_or_else(|| panic!("{target} is not running"));
        tx.send(step).unwrap();
    }

    /// Transfer tick: `done` of 100 bytes.
    pub fn progress(&self, target: &str, done: u64) {
        self.send(target, Step::Tick(RawProgress::transfer(done, Some(100), 1.0)));
    }

    pub fn post_process(&self, target: &str) {
        self.send(target, Step::Tick(RawProgress::post_process()));
    }

    pub fn finish(&self, target: &str, outcome: EngineOutcome) {
        self.send(target, Step::Finish(outcome));
    }

    pub fn succeed(&self, target: &str) {
        self.finish(
            target,
            EngineOutcome::Success(PathBuf::from(format!("/downloads/{target}"))),
        );
    }
}

impl Engine for ManualEngine {
    fn invoke(
        &self,
        request: EngineRequest<'_>,
        on_progress: &mut ProgressCallback<'_>,
    ) -> EngineOutcome {
        let target = request.target.to_string();
        let (tx, rx) = channel();
        self.started.lock().unwrap().push(target.clone());
        self.running.lock().unwrap().insert(target.clone(), tx);

        let mut last = RawProgress::transfer(0, None, 0.0);
        let outcome = loop {
            let tick = match rx.recv_timeout(HEARTBEAT) {
                Ok(Step::Tick(raw)) => {
                    last = raw.clone();
                    raw
                }
                Ok(Step::Finish(outcome)) => break outcome,
                Err(RecvTimeoutError::Timeout) => last.clone(),
                Err(RecvTimeoutError::Disconnected) => break EngineOutcome::Aborted,
            };
            if on_progress(tick).is_err() {
                break EngineOutcome::Aborted;
            }
        };
        self.running.lock().unwrap().remove(&target);
        outcome
    }

    fn destination(&self, _config: &serde_json::Value) -> Option<PathBuf> {
        self.destination.clone()
    }
}
