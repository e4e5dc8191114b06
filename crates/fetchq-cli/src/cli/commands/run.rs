//! `fetchq run` – run the orchestrator until Ctrl-C (or until idle).

use anyhow::{bail, Result};
use fetchq_core::config::FetchqConfig;
use fetchq_core::engine::{Engine, HttpEngine};
use fetchq_core::job::{JobId, JobRecord, JobStatus};
use fetchq_core::queue::{QueueEvent, QueueFile};
use fetchq_core::scheduler::{Orchestrator, OrchestratorHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::control_socket;
use crate::cli::StatePaths;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_orchestrator(
    mut cfg: FetchqConfig,
    paths: &StatePaths,
    jobs: Option<usize>,
    until_idle: bool,
) -> Result<()> {
    if let Some(n) = jobs {
        cfg.max_concurrency = n;
    }
    if control_socket::is_live(&paths.socket).await {
        bail!(
            "another `fetchq run` is already serving {}",
            paths.socket.display()
        );
    }

    let engine: Arc<dyn Engine> = Arc::new(HttpEngine::from_config(&cfg)?);
    let handle = Orchestrator::load(&cfg, engine, QueueFile::new(&paths.queue))?;
    let listener = control_socket::spawn_control_listener(handle.clone(), &paths.socket)?;
    let mut events = handle.subscribe();

    println!(
        "fetchq: {} job(s) in queue, up to {} at a time. Ctrl-C to stop.",
        handle.snapshot().len(),
        cfg.capacity()
    );

    let mut printer = ProgressPrinter::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while !(until_idle && is_idle(&handle)) {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Stopping; running jobs will restart on the next run.");
                break;
            }
            event = events.recv() => match event {
                Ok(QueueEvent::Updated(record)) => printer.update(&record),
                Ok(QueueEvent::Removed(id)) => {
                    printer.forget(id);
                    println!("job {id}: removed");
                }
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    listener.abort();
    handle.shutdown().await?;
    if let Err(e) = std::fs::remove_file(&paths.socket) {
        tracing::debug!(path = %paths.socket.display(), "remove control socket: {}", e);
    }
    Ok(())
}

/// Nothing queued, scheduled or running.
fn is_idle(handle: &OrchestratorHandle) -> bool {
    handle.snapshot().iter().all(|r| r.status().is_terminal())
}

/// Prints every status change and at most one progress line per job per interval.
#[derive(Default)]
struct ProgressPrinter {
    last: HashMap<JobId, (JobStatus, Instant)>,
}

impl ProgressPrinter {
    fn update(&mut self, record: &JobRecord) {
        let now = Instant::now();
        let status = record.status();
        let due = match self.last.get(&record.id) {
            Some((prev, at)) => *prev != status || now.duration_since(*at) >= PROGRESS_INTERVAL,
            None => true,
        };
        if !due {
            return;
        }
        self.last.insert(record.id, (status, now));
        println!("{}", line(record));
    }

    fn forget(&mut self, id: JobId) {
        self.last.remove(&id);
    }
}

fn line(record: &JobRecord) -> String {
    let head = format!("job {}: {}", record.id, record.status());
    match record.status() {
        JobStatus::Downloading => {
            let rate = record
                .transfer_rate()
                .map(|b| format!("  {:.2} MiB/s", b / 1_048_576.0))
                .unwrap_or_default();
            let eta = record
                .eta_secs()
                .map(|s| format!("  ETA {:.0}s", s))
                .unwrap_or_default();
            let paused = if record.is_paused() { " (paused)" } else { "" };
            format!("{} {:.1}%{}{}{}", head, record.progress(), rate, eta, paused)
        }
        JobStatus::Complete => match record.artifact() {
            Some(path) => format!("{} -> {}", head, path.display()),
            None => head,
        },
        JobStatus::Error => match record.error() {
            Some(error) => format!("{} ({})", head, error),
            None => head,
        },
        _ => format!("{}  {}", head, record.title),
    }
}
