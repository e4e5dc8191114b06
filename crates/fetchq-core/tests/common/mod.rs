#![allow(dead_code)]

pub mod http_server;
pub mod manual_engine;

use std::time::Duration;

use fetchq_core::job::{JobId, JobRecord};
use fetchq_core::scheduler::OrchestratorHandle;

/// Poll the queue until `pred` holds for job `id`, or panic after 5 seconds.
pub async fn wait_for(
    handle: &OrchestratorHandle,
    id: JobId,
    what: &str,
    pred: impl Fn(&JobRecord) -> bool,
) -> JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = handle.get(id) {
            if pred(&record) {
                return record;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id}: timed out waiting for {what}; now {:?}", handle.get(id));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
