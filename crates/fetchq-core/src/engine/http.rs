//! Bundled engine: single-stream HTTP(S) GET via libcurl.
//!
//! The body is written to `<name>.part` next to the final file. Cancellation is
//! delivered through curl's progress callback (returning false aborts the
//! transfer); pausing simply blocks inside that callback.
//!
//! The connection stays open while a job is paused, and no bytes arrive. A
//! pause longer than `low_speed_time_secs` (or the server's idle timeout) ends
//! the transfer after resume with a network error; `retry` starts it again.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::naming::output_name;
use super::{Engine, EngineOutcome, EngineRequest, ProgressCallback, RawProgress};
use crate::checksum;
use crate::config::{FetchqConfig, HttpConfig};
use crate::storage;

const DEFAULT_USER_AGENT: &str = concat!("fetchq/", env!("CARGO_PKG_VERSION"));

/// Minimum gap between progress reports during the transfer.
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Per-job options, stored as the job's opaque config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Output directory; the engine's default directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Output file name; derived from the URL when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Expected SHA-256 (hex) of the finished file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Extra request headers, each `Name: value`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

impl FetchOptions {
    /// Null config means all defaults.
    pub fn from_value(config: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if config.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(config.clone())
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

enum TransferEnd {
    Done,
    Aborted,
    Failed(String),
}

/// HTTP engine configured from the `[http]` section.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    http: HttpConfig,
    default_dir: PathBuf,
}

impl HttpEngine {
    pub fn new(http: HttpConfig, default_dir: PathBuf) -> Self {
        Self { http, default_dir }
    }

    pub fn from_config(cfg: &FetchqConfig) -> Result<Self> {
        Ok(Self::new(cfg.http.clone(), cfg.default_output_dir()?))
    }

    fn output_dir(&self, opts: &FetchOptions) -> PathBuf {
        opts.output_dir
            .clone()
            .unwrap_or_else(|| self.default_dir.clone())
    }

    /// Final location of the artifact for `target` with `opts`.
    pub fn output_path(&self, target: &str, opts: &FetchOptions) -> PathBuf {
        self.output_dir(opts)
            .join(output_name(target, opts.filename.as_deref()))
    }

    fn configure(
        &self,
        easy: &mut curl::easy::Easy,
        target: &str,
        opts: &FetchOptions,
    ) -> Result<(), curl::Error> {
        easy.url(target)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.progress(true)?;
        easy.connect_timeout(Duration::from_secs(self.http.connect_timeout_secs))?;
        easy.low_speed_limit(self.http.low_speed_limit_bytes)?;
        easy.low_speed_time(Duration::from_secs(self.http.low_speed_time_secs))?;
        if let Some(speed) = self.http.max_bytes_per_sec {
            easy.max_recv_speed(speed)?;
        }
        easy.useragent(self.http.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))?;
        if !opts.headers.is_empty() {
            let mut list = curl::easy::List::new();
            for header in &opts.headers {
                list.append(header)?;
            }
            easy.http_headers(list)?;
        }
        Ok(())
    }

    fn transfer(
        &self,
        target: &str,
        opts: &FetchOptions,
        temp: &Path,
        on_progress: &mut ProgressCallback<'_>,
    ) -> TransferEnd {
        if let Some(dir) = temp.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                return TransferEnd::Failed(format!("storage: create {}: {}", dir.display(), e));
            }
        }
        let file = match File::create(temp) {
            Ok(f) => f,
            Err(e) => {
                return TransferEnd::Failed(format!("storage: create {}: {}", temp.display(), e))
            }
        };
        let mut out = BufWriter::new(file);
        let mut easy = curl::easy::Easy::new();
        if let Err(e) = self.configure(&mut easy, target, opts) {
            return TransferEnd::Failed(format!("invalid request: {}", e));
        }

        let started = Instant::now();
        let mut last_report: Option<Instant> = None;
        let mut aborted = false;
        let mut write_error: Option<std::io::Error> = None;

        let performed = {
            let mut transfer = easy.transfer();
            let mut setup = transfer.write_function(|data| match out.write_all(data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    write_error = Some(e);
                    Ok(0)
                }
            });
            if setup.is_ok() {
                setup = transfer.progress_function(|dltotal, dlnow, _, _| {
                    let total = (dltotal > 0.0).then_some(dltotal as u64);
                    let done = dlnow.max(0.0) as u64;
                    let finished = total.is_some_and(|t| done >= t);
                    let due = last_report.map_or(true, |t| t.elapsed() >= REPORT_INTERVAL);
                    if !due && !finished {
                        return true;
                    }
                    last_report = Some(Instant::now());
                    let raw = RawProgress::transfer(done, total, started.elapsed().as_secs_f64());
                    match on_progress(raw) {
                        Ok(()) => true,
                        Err(_) => {
                            aborted = true;
                            false
                        }
                    }
                });
            }
            setup.and_then(|_| transfer.perform())
        };

        if aborted {
            return TransferEnd::Aborted;
        }
        if let Err(e) = performed {
            if let Some(io) = write_error {
                return TransferEnd::Failed(format!("storage: write {}: {}", temp.display(), io));
            }
            if e.is_aborted_by_callback() {
                return TransferEnd::Aborted;
            }
            return TransferEnd::Failed(e.to_string());
        }

        let code = easy.response_code().unwrap_or(0);
        // 0 for schemes without status codes (file://).
        if code != 0 && !(200..300).contains(&code) {
            return TransferEnd::Failed(format!("HTTP {} from {}", code, target));
        }
        let synced = out.flush().and_then(|_| out.get_ref().sync_all());
        if let Err(e) = synced {
            return TransferEnd::Failed(format!("storage: sync {}: {}", temp.display(), e));
        }
        TransferEnd::Done
    }
}

fn discard(temp: &Path) {
    if let Err(e) = std::fs::remove_file(temp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("could not remove {}: {}", temp.display(), e);
        }
    }
}

impl Engine for HttpEngine {
    fn invoke(
        &self,
        request: EngineRequest<'_>,
        on_progress: &mut ProgressCallback<'_>,
    ) -> EngineOutcome {
        let opts = match FetchOptions::from_value(request.config) {
            Ok(o) => o,
            Err(e) => return EngineOutcome::Failure(format!("invalid job config: {}", e)),
        };
        let final_path = self.output_path(request.target, &opts);
        let temp = storage::temp_path(&final_path);
        tracing::debug!(target_url = request.target, path = %final_path.display(), "starting transfer");

        match self.transfer(request.target, &opts, &temp, on_progress) {
            TransferEnd::Done => {}
            TransferEnd::Aborted => {
                discard(&temp);
                return EngineOutcome::Aborted;
            }
            TransferEnd::Failed(msg) => {
                discard(&temp);
                return EngineOutcome::Failure(msg);
            }
        }

        if on_progress(RawProgress::post_process()).is_err() {
            discard(&temp);
            return EngineOutcome::Aborted;
        }
        if let Some(expected) = opts.sha256.as_deref() {
            match checksum::verify_sha256(&temp, expected) {
                Ok(None) => {}
                Ok(Some(actual)) => {
                    discard(&temp);
                    return EngineOutcome::Failure(format!(
                        "checksum mismatch: expected {}, got {}",
                        expected, actual
                    ));
                }
                Err(e) => {
                    discard(&temp);
                    return EngineOutcome::Failure(format!("storage: {:#}", e));
                }
            }
        }
        if let Err(e) = storage::finalize(&temp, &final_path) {
            discard(&temp);
            return EngineOutcome::Failure(format!("storage: {:#}", e));
        }
        EngineOutcome::Success(final_path)
    }

    fn destination(&self, config: &serde_json::Value) -> Option<PathBuf> {
        FetchOptions::from_value(config)
            .ok()
            .map(|opts| self.output_dir(&opts))
    }
}
