//! Normalized progress written into a job record on each engine tick.

use super::JobStatus;
use crate::engine::{Phase, RawProgress};

/// Progress snapshot for one job, derived from the engine's raw counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Percent complete (rounded to one decimal), or None when the total is unknown
    /// or the engine is post-processing.
    pub percent: Option<f64>,
    /// Bytes per second.
    pub transfer_rate: Option<f64>,
    /// Seconds remaining.
    pub estimated_remaining: Option<f64>,
    /// `Downloading` during the transfer phase, `Merging` during post-processing.
    pub status: JobStatus,
}

impl ProgressUpdate {
    pub fn from_raw(raw: &RawProgress) -> Self {
        match raw.phase {
            Phase::PostProcess => Self {
                percent: None,
                transfer_rate: None,
                estimated_remaining: None,
                status: JobStatus::Merging,
            },
            Phase::Transfer => Self {
                percent: raw.fraction().map(|f| (f * 1000.0).round() / 10.0),
                transfer_rate: raw.rate.filter(|r| r.is_finite() && *r > 0.0),
                estimated_remaining: raw.eta.filter(|e| e.is_finite() && *e >= 0.0),
                status: JobStatus::Downloading,
            },
        }
    }
}
