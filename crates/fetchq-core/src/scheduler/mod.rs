//! Job scheduler.
//!
//! Coordinates the queue and its workers: admission under the concurrency cap,
//! deferred activation of scheduled jobs, per-job execution on blocking worker
//! threads, and the control loop that ties them together.

mod admission;
mod command;
mod execute;
mod orchestrator;
mod timer;

pub use command::{Command, JobView, Reply};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
