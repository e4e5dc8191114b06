//! The external engine contract.
//!
//! An engine performs the actual fetch/transform for one job. It is invoked on a
//! worker thread with the job's target and opaque config, reports progress through
//! a callback zero or more times, and returns exactly one outcome. When the callback
//! returns `Err(JobAborted)` the engine must unwind and return `EngineOutcome::Aborted`.

mod http;
mod naming;

pub use http::{FetchOptions, HttpEngine};
pub use naming::output_name;

use std::path::PathBuf;

use crate::control::JobAborted;

/// Phase reported with each progress tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Data is being transferred.
    Transfer,
    /// Transfer finished; the engine is combining/verifying/moving output.
    PostProcess,
}

/// Raw progress counters as reported by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProgress {
    pub phase: Phase,
    pub bytes_done: u64,
    /// Total size if known.
    pub bytes_total: Option<u64>,
    /// Bytes per second.
    pub rate: Option<f64>,
    /// Estimated seconds remaining.
    pub eta: Option<f64>,
}

impl RawProgress {
    /// Transfer tick with rate = bytes_done / elapsed and ETA = remaining / rate.
    pub fn transfer(bytes_done: u64, bytes_total: Option<u64>, elapsed_secs: f64) -> Self {
        let rate = if elapsed_secs > 0.0 {
            Some(bytes_done as f64 / elapsed_secs)
        } else {
            None
        };
        let eta = match (bytes_total, rate) {
            (Some(total), _) if bytes_done >= total => Some(0.0),
            (Some(total), Some(r)) if r > 0.0 => Some((total - bytes_done) as f64 / r),
            _ => None,
        };
        Self {
            phase: Phase::Transfer,
            bytes_done,
            bytes_total,
            rate,
            eta,
        }
    }

    pub fn post_process() -> Self {
        Self {
            phase: Phase::PostProcess,
            bytes_done: 0,
            bytes_total: None,
            rate: None,
            eta: None,
        }
    }

    /// Fraction complete in [0.0, 1.0], if the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(total) if total > 0 => Some((self.bytes_done as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Terminal result of one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// Final artifact location.
    Success(PathBuf),
    /// Raw failure text; classified by the caller.
    Failure(String),
    /// The progress callback signalled cancellation and the engine unwound.
    Aborted,
}

/// What the engine is asked to do for one job.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub target: &'a str,
    pub config: &'a serde_json::Value,
}

/// Progress callback handed to the engine. Returning `Err` requests an abort.
pub type ProgressCallback<'a> = dyn FnMut(RawProgress) -> Result<(), JobAborted> + 'a;

/// A fetch/transform engine. Implementations block the calling thread for the
/// whole job; the orchestrator always calls `invoke` from a dedicated worker thread.
pub trait Engine: Send + Sync + 'static {
    fn invoke(&self, request: EngineRequest<'_>, on_progress: &mut ProgressCallback<'_>)
        -> EngineOutcome;

    /// Directory the job will write into, used for the free-space check before
    /// admission. `None` skips the check.
    fn destination(&self, _config: &serde_json::Value) -> Option<PathBuf> {
        None
    }
}
