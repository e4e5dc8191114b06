//! Failure taxonomy: classify raw engine failure text into a small set of kinds.
//!
//! The engine only hands back free-form text, so classification is best-effort
//! pattern matching. Each kind carries a human-readable message that is stored
//! on the job record; failures are never retried automatically.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Target cannot be fetched (removed, private, forbidden, region-locked).
    ResourceUnavailable,
    /// Transient connectivity failure (DNS, refused, reset, timeout, 5xx).
    NetworkError,
    /// Destination lacks the required free space.
    InsufficientStorage,
    /// Anything the engine reported that matches none of the above.
    EngineFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ResourceUnavailable => "resource unavailable",
            FailureKind::NetworkError => "network error",
            FailureKind::InsufficientStorage => "insufficient storage",
            FailureKind::EngineFailure => "engine failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure stored on a job record while its status is `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    /// Classify `raw` engine text and build the user-facing message for it.
    pub fn from_engine(raw: &str) -> Self {
        let kind = classify(raw);
        Self {
            kind,
            message: describe(kind, raw),
        }
    }

    pub fn insufficient_storage(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InsufficientStorage,
            message: detail.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

const STORAGE_PATTERNS: &[&str] = &["no space left", "disk full", "not enough disk space"];

const UNAVAILABLE_PATTERNS: &[&str] = &[
    "private",
    "age-restricted",
    "age restricted",
    "unavailable",
    "not available",
    "not found",
    "forbidden",
    "gone",
];

const NETWORK_PATTERNS: &[&str] = &[
    "urlopen",
    "connection",
    "connect",
    "network",
    "resolve",
    "timed out",
    "timeout",
    "reset by peer",
];

/// Extract an HTTP status code from text such as `"HTTP 404 not found"` or `"HTTP Error 503"`.
pub fn http_status_in(raw: &str) -> Option<u32> {
    let lower = raw.to_ascii_lowercase();
    let mut rest = lower.as_str();
    while let Some(pos) = rest.find("http") {
        rest = &rest[pos + 4..];
        let digits: String = rest
            .trim_start_matches(|c: char| c == ' ' || c == ':')
            .trim_start_matches("error")
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.len() == 3 {
            if let Ok(code) = digits.parse::<u32>() {
                return Some(code);
            }
        }
    }
    None
}

/// Classify an HTTP status code. Only error statuses map to a kind.
pub fn classify_http_status(code: u32) -> Option<FailureKind> {
    match code {
        400..=499 => Some(FailureKind::ResourceUnavailable),
        500..=599 => Some(FailureKind::NetworkError),
        _ => None,
    }
}

/// Classify raw engine failure text.
pub fn classify(raw: &str) -> FailureKind {
    let lower = raw.to_ascii_lowercase();
    if STORAGE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return FailureKind::InsufficientStorage;
    }
    if let Some(kind) = http_status_in(raw).and_then(classify_http_status) {
        return kind;
    }
    if UNAVAILABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return FailureKind::ResourceUnavailable;
    }
    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return FailureKind::NetworkError;
    }
    FailureKind::EngineFailure
}

/// Human-readable message for a classified failure.
pub fn describe(kind: FailureKind, raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    match kind {
        FailureKind::InsufficientStorage => {
            "Not enough disk space in the selected output directory.".to_string()
        }
        FailureKind::ResourceUnavailable if lower.contains("private") => {
            "This resource is private and cannot be downloaded.".to_string()
        }
        FailureKind::ResourceUnavailable
            if lower.contains("age-restricted") || lower.contains("age restricted") =>
        {
            "This resource is age-restricted. Try again with credentials or cookies.".to_string()
        }
        FailureKind::ResourceUnavailable => {
            format!("The resource is unavailable or has been removed ({}).", raw.trim())
        }
        FailureKind::NetworkError => format!(
            "Network error, check your connection and try again ({}).",
            raw.trim()
        ),
        FailureKind::EngineFailure => format!("Download error: {}", raw.trim()),
    }
}
