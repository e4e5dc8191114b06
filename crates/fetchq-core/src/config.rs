use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tuning for the bundled HTTP engine (optional `[http]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Seconds allowed for the TCP/TLS connect phase.
    pub connect_timeout_secs: u64,
    /// Abort when the rate stays below `low_speed_limit_bytes` for `low_speed_time_secs`.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
    /// Per-job bandwidth cap in bytes per second (None = no cap).
    pub max_bytes_per_sec: Option<u64>,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            max_bytes_per_sec: None,
            user_agent: None,
        }
    }
}

/// Global configuration loaded from `~/.config/fetchq/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchqConfig {
    /// Maximum number of jobs running at once.
    pub max_concurrency: usize,
    /// How often scheduled jobs are checked for activation.
    pub schedule_tick_secs: u64,
    /// How often in-flight progress is written to the queue file.
    pub progress_flush_secs: u64,
    /// How long shutdown waits for cancelled workers to unwind.
    pub shutdown_grace_secs: u64,
    /// Jobs are not admitted when their output directory has less free space than this.
    pub min_free_bytes: u64,
    /// Default output directory (None = current directory).
    pub download_dir: Option<PathBuf>,
    pub http: HttpConfig,
}

impl Default for FetchqConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            schedule_tick_secs: 10,
            progress_flush_secs: 2,
            shutdown_grace_secs: 5,
            min_free_bytes: 100 * 1024 * 1024,
            download_dir: None,
            http: HttpConfig::default(),
        }
    }
}

impl FetchqConfig {
    /// Capacity is never below one job.
    pub fn capacity(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn schedule_tick(&self) -> Duration {
        Duration::from_secs(self.schedule_tick_secs.max(1))
    }

    pub fn progress_flush(&self) -> Duration {
        Duration::from_secs(self.progress_flush_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Output directory for jobs that do not name one.
    pub fn default_output_dir(&self) -> Result<PathBuf> {
        match &self.download_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("current directory"),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchqConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<FetchqConfig> {
    if !path.exists() {
        let default_cfg = FetchqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FetchqConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
