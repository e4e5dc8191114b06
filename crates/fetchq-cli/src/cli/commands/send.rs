//! Every queue command: forwarded to `fetchq run` over the control socket, or
//! applied to the queue file directly when no orchestrator is running.

use anyhow::{bail, Result};
use fetchq_core::job::unix_timestamp;
use fetchq_core::queue::QueueFile;
use fetchq_core::scheduler::{Command, JobView, Reply};

use super::status;
use crate::cli::control_socket;
use crate::cli::StatePaths;

pub async fn run_command(paths: &StatePaths, command: Command, json: bool) -> Result<()> {
    let jobs = execute(paths, &command).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        report(&command, &jobs);
    }
    Ok(())
}

async fn execute(paths: &StatePaths, command: &Command) -> Result<Vec<JobView>> {
    match control_socket::send_request(&paths.socket, command).await? {
        Some(Reply::Ok { jobs }) => Ok(jobs),
        Some(Reply::Err { message }) => bail!(message),
        None => apply_offline(&QueueFile::new(&paths.queue), command),
    }
}

/// Edit the queue file in place. Only valid while no orchestrator owns it.
pub(crate) fn apply_offline(file: &QueueFile, command: &Command) -> Result<Vec<JobView>> {
    if command.needs_orchestrator() {
        bail!("no orchestrator is running; start one with `fetchq run`");
    }
    let mut store = file.load()?;
    let records = command.apply(&mut store, unix_timestamp())?;
    if !command.is_read_only() {
        file.save(&store)?;
        tracing::debug!(path = %file.path().display(), "queue file updated offline");
    }
    Ok(records.into_iter().map(JobView::from).collect())
}

fn report(command: &Command, jobs: &[JobView]) {
    let ids = || {
        jobs.iter()
            .map(|j| j.record.id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match command {
        Command::Enqueue { .. } | Command::EnqueueBatch { .. } => {
            for job in jobs {
                match job.record.scheduled_at() {
                    Some(at) => println!(
                        "Added job {} for {} (scheduled {})",
                        job.record.id,
                        job.record.target,
                        status::format_when(at, unix_timestamp())
                    ),
                    None => println!("Added job {} for {}", job.record.id, job.record.target),
                }
            }
        }
        Command::Remove { .. } => println!("Removed job(s) {}", ids()),
        Command::Reorder { id, .. } => println!("Moved job {id}"),
        Command::Pause { id } => println!("Paused job {id}"),
        Command::Resume { id } => println!("Resumed job {id}"),
        Command::Cancel { id } => println!("Cancel requested for job {id}"),
        Command::Retry { .. } | Command::RetryAllFailed if jobs.is_empty() => {
            println!("Nothing to retry.")
        }
        Command::Retry { .. } | Command::RetryAllFailed => println!("Requeued job(s) {}", ids()),
        Command::Schedule { id, at } => println!(
            "Job {id} scheduled {}",
            status::format_when(*at, unix_timestamp())
        ),
        Command::StartAll if jobs.is_empty() => println!("Nothing to start."),
        Command::StartAll => println!("Started job(s) {}", ids()),
        Command::ClearCompleted => println!("Cleared {} job(s)", jobs.len()),
        Command::Status => status::print_table(jobs),
    }
}
