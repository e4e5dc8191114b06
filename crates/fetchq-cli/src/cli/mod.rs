//! CLI for the fetchq queue orchestrator.

mod commands;
mod control_socket;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fetchq_core::config;
use fetchq_core::control::default_control_socket_path;
use fetchq_core::job::{unix_timestamp, JobId};
use fetchq_core::queue::QueueFile;
use fetchq_core::scheduler::Command;
use std::path::{Path, PathBuf};

use commands::{print_completions, print_man, run_command, run_orchestrator, AddArgs};

/// Top-level CLI for fetchq.
#[derive(Debug, Parser)]
#[command(name = "fetchq", version)]
#[command(about = "fetchq: local queue orchestrator for long-running downloads", long_about = None)]
pub struct Cli {
    /// Keep the queue file and control socket in DIR instead of the XDG state directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a job to the end of the queue.
    Add(AddArgs),

    /// Add one job per line of FILE (blank lines and `#` comments are skipped).
    AddBatch {
        /// File with one URL per line; `-` reads stdin.
        file: PathBuf,
    },

    /// Remove jobs; running ones are cancelled first.
    Remove {
        /// Job identifiers.
        #[arg(required = true)]
        ids: Vec<JobId>,
    },

    /// Move a job up (negative) or down (positive) in the queue.
    Move {
        /// Job identifier.
        id: JobId,
        /// Positions to move; clamped to the queue bounds.
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },

    /// Pause a running job. Needs `fetchq run`.
    Pause {
        /// Job identifier.
        id: JobId,
    },

    /// Resume a paused job. Needs `fetchq run`.
    Resume {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a running job. Needs `fetchq run`.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Requeue failed or cancelled jobs from zero.
    Retry {
        /// Job identifiers.
        #[arg(required = true)]
        ids: Vec<JobId>,
    },

    /// Requeue every failed or cancelled job.
    RetryFailed,

    /// Defer a queued job until a time: unix seconds, or `+SECS` from now.
    Schedule {
        /// Job identifier.
        id: JobId,
        /// Activation time.
        #[arg(value_parser = parse_when)]
        at: i64,
    },

    /// Start queued jobs up to the concurrency limit. Needs `fetchq run`.
    StartAll,

    /// Drop completed, failed and cancelled jobs from the queue.
    ClearCompleted,

    /// Show all jobs.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Run the orchestrator: process the queue and serve the control socket.
    Run {
        /// Run up to N jobs concurrently (default: `max_concurrency` from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Exit once nothing is queued, scheduled or running.
        #[arg(long)]
        until_idle: bool,
    },

    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },

    /// Print the man page (roff).
    Man,
}

/// Parse `<unix|+secs>` into unix seconds.
pub fn parse_when(s: &str) -> Result<i64, String> {
    parse_when_at(s, unix_timestamp())
}

fn parse_when_at(s: &str, now: i64) -> Result<i64, String> {
    let s = s.trim();
    if let Some(rel) = s.strip_prefix('+') {
        let secs: i64 = rel
            .parse()
            .map_err(|_| format!("invalid relative time `{s}`, expected +SECS"))?;
        return now
            .checked_add(secs)
            .ok_or_else(|| format!("time `{s}` is out of range"));
    }
    s.parse()
        .map_err(|_| format!("invalid time `{s}`, expected unix seconds or +SECS"))
}

/// Where the queue file and control socket live.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub queue: PathBuf,
    pub socket: PathBuf,
}

impl StatePaths {
    pub fn resolve(state_dir: Option<&Path>) -> Result<Self> {
        match state_dir {
            Some(dir) => Ok(Self {
                queue: dir.join("queue.json"),
                socket: dir.join("control.sock"),
            }),
            None => Ok(Self {
                queue: QueueFile::default_path()?,
                socket: default_control_socket_path()
                    .context("resolve control socket path")?,
            }),
        }
    }
}

impl CliCommand {
    /// The queue command this invocation sends, or None for `run`, `completions` and `man`.
    fn to_queue_command(&self) -> Result<Option<Command>> {
        let command = match self {
            CliCommand::Add(args) => Command::Enqueue { job: args.to_job()? },
            CliCommand::AddBatch { file } => Command::EnqueueBatch {
                jobs: commands::read_batch(file)?,
            },
            CliCommand::Remove { ids } => Command::Remove { ids: ids.clone() },
            CliCommand::Move { id, delta } => Command::Reorder {
                id: *id,
                delta: *delta,
            },
            CliCommand::Pause { id } => Command::Pause { id: *id },
            CliCommand::Resume { id } => Command::Resume { id: *id },
            CliCommand::Cancel { id } => Command::Cancel { id: *id },
            CliCommand::Retry { ids } => Command::Retry { ids: ids.clone() },
            CliCommand::RetryFailed => Command::RetryAllFailed,
            CliCommand::Schedule { id, at } => Command::Schedule { id: *id, at: *at },
            CliCommand::StartAll => Command::StartAll,
            CliCommand::ClearCompleted => Command::ClearCompleted,
            CliCommand::Status { .. } => Command::Status,
            CliCommand::Run { .. } | CliCommand::Completions { .. } | CliCommand::Man => {
                return Ok(None)
            }
        };
        Ok(Some(command))
    }

    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match &cli.command {
            CliCommand::Completions { shell } => return print_completions(*shell),
            CliCommand::Man => return print_man(),
            _ => {}
        }

        let paths = StatePaths::resolve(cli.state_dir.as_deref())?;
        match cli.command {
            CliCommand::Run { jobs, until_idle } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                run_orchestrator(cfg, &paths, jobs, until_idle).await
            }
            CliCommand::Status { json } => run_command(&paths, Command::Status, json).await,
            other => match other.to_queue_command()? {
                Some(command) => run_command(&paths, command, false).await,
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests;
