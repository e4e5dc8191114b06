use fetchq_core::logging;
use std::time::Duration;
use tokio::runtime::Runtime;

mod cli;

use crate::cli::CliCommand;

/// How long exit waits for blocking workers once the command has returned.
/// Jobs still running by then were already requeued by the orchestrator.
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

fn build_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

fn main() {
    // Initialize logging as early as possible.
    if let Err(err) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("log file unavailable, logging to stderr: {:#}", err);
    }

    let runtime = match build_runtime() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("fetchq error: start async runtime: {}", err);
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(CliCommand::run_from_args());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);

    if let Err(err) = result {
        eprintln!("fetchq error: {:#}", err);
        std::process::exit(1);
    }
}
