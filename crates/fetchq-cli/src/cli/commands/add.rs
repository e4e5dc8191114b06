//! `fetchq add <url>` and `fetchq add-batch <file>` – build jobs for the queue.

use anyhow::{Context, Result};
use clap::Args;
use fetchq_core::engine::FetchOptions;
use fetchq_core::job::NewJob;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::cli::parse_when;

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    /// URL to download.
    pub url: String,

    /// Display name (defaults to the URL).
    #[arg(long)]
    pub title: Option<String>,

    /// Output directory (defaults to `download_dir` from config, else where `fetchq run` runs).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output file name (defaults to the last URL path segment).
    #[arg(long)]
    pub filename: Option<String>,

    /// Expected SHA-256 of the finished file, hex.
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,

    /// Extra request header; repeatable.
    #[arg(long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Hold the job until this time: unix seconds, or `+SECS` from now.
    #[arg(long, value_parser = parse_when)]
    pub at: Option<i64>,
}

impl AddArgs {
    pub fn to_job(&self) -> Result<NewJob> {
        // Relative to the caller, not to the `run` process.
        let output_dir = match &self.output_dir {
            Some(dir) if dir.is_relative() => Some(
                std::env::current_dir()
                    .context("resolve current directory")?
                    .join(dir),
            ),
            other => other.clone(),
        };
        let opts = FetchOptions {
            output_dir,
            filename: self.filename.clone(),
            sha256: self.sha256.clone(),
            headers: self.headers.clone(),
        };
        let mut job = NewJob::new(self.url.clone());
        if opts != FetchOptions::default() {
            job = job.with_config(opts.to_value());
        }
        if let Some(title) = &self.title {
            job = job.with_title(title.clone());
        }
        if let Some(at) = self.at {
            job = job.scheduled_at(at);
        }
        Ok(job)
    }
}

/// One job per non-empty line; `#` starts a comment line.
pub fn parse_batch(text: &str) -> Vec<NewJob> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(NewJob::new)
        .collect()
}

/// Read a batch file (`-` for stdin).
pub fn read_batch(path: &Path) -> Result<Vec<NewJob>> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read batch from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("read batch file {}", path.display()))?
    };
    let jobs = parse_batch(&text);
    anyhow::ensure!(!jobs.is_empty(), "no URLs in {}", path.display());
    Ok(jobs)
}
