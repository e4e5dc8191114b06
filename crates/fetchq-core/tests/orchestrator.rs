//! Integration tests: the control loop driving a manually stepped engine.

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::manual_engine::ManualEngine;
use common::wait_for;
use fetchq_core::config::FetchqConfig;
use fetchq_core::engine::{Engine, EngineOutcome, EngineRequest, ProgressCallback, RawProgress};
use fetchq_core::error::QueueError;
use fetchq_core::failure::FailureKind;
use fetchq_core::job::{unix_timestamp, JobStatus, NewJob};
use fetchq_core::queue::{QueueEvent, QueueFile, QueueStore};
use fetchq_core::scheduler::{Orchestrator, OrchestratorHandle};
use tempfile::tempdir;

fn config(max_concurrency: usize) -> FetchqConfig {
    FetchqConfig {
        max_concurrency,
        schedule_tick_secs: 1,
        progress_flush_secs: 1,
        shutdown_grace_secs: 2,
        min_free_bytes: 0,
        ..FetchqConfig::default()
    }
}

fn spawn(engine: &Arc<ManualEngine>, cfg: FetchqConfig) -> OrchestratorHandle {
    let engine: Arc<dyn Engine> = engine.clone();
    Orchestrator::spawn(&cfg, engine, QueueStore::new(), None)
}

fn active_count(handle: &OrchestratorHandle) -> usize {
    handle.snapshot().iter().filter(|r| r.is_active()).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admission_is_fifo_with_capacity_one() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    let _a = handle.enqueue(NewJob::new("a")).await.unwrap();
    let b = handle.enqueue(NewJob::new("b")).await.unwrap();
    let c = handle.enqueue(NewJob::new("c")).await.unwrap();

    engine.wait_started("a").await;
    assert_eq!(handle.get(b.id).unwrap().status(), JobStatus::Queued);
    assert_eq!(handle.get(c.id).unwrap().status(), JobStatus::Queued);
    assert_eq!(active_count(&handle), 1);

    engine.succeed("a");
    engine.wait_started("b").await;
    assert_eq!(handle.get(c.id).unwrap().status(), JobStatus::Queued);
    engine.succeed("b");
    engine.wait_started("c").await;
    engine.succeed("c");
    wait_for(&handle, c.id, "completion", |r| r.status() == JobStatus::Complete).await;

    assert_eq!(engine.started(), vec!["a", "b", "c"]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capacity_two_admits_third_when_one_completes() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(2));
    let jobs = handle
        .enqueue_batch(vec![NewJob::new("a"), NewJob::new("b"), NewJob::new("c")])
        .await
        .unwrap();

    engine.wait_started("a").await;
    engine.wait_started("b").await;
    assert_eq!(active_count(&handle), 2);
    assert_eq!(handle.get(jobs[2].id).unwrap().status(), JobStatus::Queued);

    engine.succeed("a");
    engine.wait_started("c").await;
    let a = wait_for(&handle, jobs[0].id, "completion", |r| r.status() == JobStatus::Complete).await;
    assert_eq!(a.progress(), 100.0);
    assert!(a.artifact().is_some());
    assert!(active_count(&handle) <= 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_holds_progress_and_resume_continues() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    let job = handle.enqueue(NewJob::new("a")).await.unwrap();
    engine.wait_started("a").await;

    engine.progress("a", 40);
    wait_for(&handle, job.id, "40%", |r| r.progress() == 40.0).await;
    assert_eq!(handle.get(job.id).unwrap().status(), JobStatus::Downloading);

    let paused = handle.pause(job.id).await.unwrap();
    assert!(paused.is_paused());
    engine.progress("a", 45);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.get(job.id).unwrap().progress(), 40.0);

    let resumed = handle.resume(job.id).await.unwrap();
    assert!(!resumed.is_paused());
    let record = wait_for(&handle, job.id, "45%", |r| r.progress() == 45.0).await;
    assert!(record.progress() >= 40.0);

    engine.post_process("a");
    wait_for(&handle, job.id, "merging", |r| r.status() == JobStatus::Merging).await;
    engine.succeed("a");
    wait_for(&handle, job.id, "completion", |r| r.status() == JobStatus::Complete).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_while_paused_ends_cancelled_and_retry_requeues() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    let job = handle.enqueue(NewJob::new("a")).await.unwrap();
    engine.wait_started("a").await;
    engine.progress("a", 70);
    wait_for(&handle, job.id, "70%", |r| r.progress() == 70.0).await;

    handle.pause(job.id).await.unwrap();
    handle.cancel(job.id).await.unwrap();
    let cancelled =
        wait_for(&handle, job.id, "cancellation", |r| r.status() == JobStatus::Cancelled).await;
    assert!(!cancelled.is_paused());
    assert_eq!(
        handle.pause(job.id).await.unwrap_err(),
        QueueError::NotActive(job.id)
    );

    let retried = handle.retry(vec![job.id]).await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].status(), JobStatus::Queued);
    assert_eq!(retried[0].progress(), 0.0);

    wait_for(&handle, job.id, "restart", |r| r.is_active()).await;
    for _ in 0..500 {
        if engine.started().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.started(), vec!["a", "a"]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_failure_is_classified_and_retry_all_failed_resets() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(2));
    let a = handle.enqueue(NewJob::new("a")).await.unwrap();
    let b = handle.enqueue(NewJob::new("b")).await.unwrap();
    engine.wait_started("a").await;
    engine.wait_started("b").await;

    engine.progress("a", 20);
    engine.finish("a", EngineOutcome::Failure("HTTP 404 from server".into()));
    engine.finish("b", EngineOutcome::Failure("Connection reset by peer".into()));
    let a = wait_for(&handle, a.id, "error", |r| r.status() == JobStatus::Error).await;
    let b = wait_for(&handle, b.id, "error", |r| r.status() == JobStatus::Error).await;
    assert_eq!(a.error().unwrap().kind, FailureKind::ResourceUnavailable);
    assert_eq!(b.error().unwrap().kind, FailureKind::NetworkError);

    let reset = handle.retry_all_failed().await.unwrap();
    assert_eq!(reset.len(), 2);
    assert!(reset
        .iter()
        .all(|r| r.status() == JobStatus::Queued && r.progress() == 0.0 && r.error().is_none()));
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_job_waits_for_its_time() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    let at = unix_timestamp() + 2;
    let job = handle
        .enqueue(NewJob::new("later").scheduled_at(at))
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Scheduled);
    assert_eq!(job.scheduled_at(), Some(at));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(engine.started().is_empty());
    assert_eq!(handle.get(job.id).unwrap().status(), JobStatus::Scheduled);

    engine.wait_started("later").await;
    let record = handle.get(job.id).unwrap();
    assert!(record.is_active());
    assert_eq!(record.scheduled_at(), None);
    assert!(unix_timestamp() >= at);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_rules() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    let running = handle.enqueue(NewJob::new("a")).await.unwrap();
    let waiting = handle.enqueue(NewJob::new("b")).await.unwrap();
    engine.wait_started("a").await;

    let now = unix_timestamp();
    assert_eq!(
        handle.schedule(waiting.id, now - 1).await.unwrap_err(),
        QueueError::ScheduleInPast { at: now - 1 }
    );
    let scheduled = handle.schedule(waiting.id, now + 3600).await.unwrap();
    assert_eq!(scheduled.status(), JobStatus::Scheduled);
    assert!(matches!(
        handle.schedule(running.id, now + 3600).await,
        Err(QueueError::InvalidTransition { .. })
    ));
    assert_eq!(
        handle.schedule(999, now + 10).await.unwrap_err(),
        QueueError::NotFound(999)
    );

    engine.succeed("a");
    wait_for(&handle, running.id, "completion", |r| r.status() == JobStatus::Complete).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.started(), vec!["a"]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_cancels_running_job_and_frees_slot_when_it_stops() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    let mut events = handle.subscribe();
    let a = handle.enqueue(NewJob::new("a")).await.unwrap();
    let b = handle.enqueue(NewJob::new("b")).await.unwrap();
    engine.wait_started("a").await;

    let removed = handle.remove(vec![a.id]).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(handle.get(a.id).is_none());

    engine.wait_started("b").await;
    wait_for(&handle, b.id, "admission", |r| r.is_active()).await;

    let mut saw_removed = false;
    while let Ok(event) = events.try_recv() {
        if event == QueueEvent::Removed(a.id) {
            saw_removed = true;
        }
    }
    assert!(saw_removed);
    assert_eq!(
        handle.remove(vec![a.id]).await.unwrap_err(),
        QueueError::NotFound(a.id)
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_commands_need_an_active_job() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    handle.enqueue(NewJob::new("a")).await.unwrap();
    let queued = handle.enqueue(NewJob::new("b")).await.unwrap();
    engine.wait_started("a").await;

    assert_eq!(
        handle.pause(queued.id).await.unwrap_err(),
        QueueError::NotActive(queued.id)
    );
    assert_eq!(
        handle.cancel(queued.id).await.unwrap_err(),
        QueueError::NotActive(queued.id)
    );
    assert_eq!(
        handle.resume(42).await.unwrap_err(),
        QueueError::NotFound(42)
    );

    let moved = handle.reorder(queued.id, -5).await.unwrap();
    assert_eq!(moved.id, queued.id);
    assert_eq!(handle.snapshot()[0].id, queued.id);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn insufficient_storage_fails_before_starting() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(ManualEngine::writing_to(dir.path().join("out")));
    let cfg = FetchqConfig {
        min_free_bytes: u64::MAX,
        ..config(2)
    };
    let handle = spawn(&engine, cfg);
    let job = handle.enqueue(NewJob::new("big")).await.unwrap();

    let record = wait_for(&handle, job.id, "refusal", |r| r.status() == JobStatus::Error).await;
    assert_eq!(
        record.error().unwrap().kind,
        FailureKind::InsufficientStorage
    );
    assert!(engine.started().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_completed_drops_finished_jobs() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(3));
    let jobs = handle
        .enqueue_batch(vec![NewJob::new("a"), NewJob::new("b"), NewJob::new("c")])
        .await
        .unwrap();
    for target in ["a", "b", "c"] {
        engine.wait_started(target).await;
    }
    engine.succeed("a");
    engine.finish("b", EngineOutcome::Failure("weird".into()));
    wait_for(&handle, jobs[0].id, "completion", |r| r.status() == JobStatus::Complete).await;
    wait_for(&handle, jobs[1].id, "error", |r| r.status() == JobStatus::Error).await;

    let cleared = handle.clear_completed().await.unwrap();
    assert_eq!(cleared.len(), 2);
    let left: Vec<_> = handle.snapshot().iter().map(|r| r.id).collect();
    assert_eq!(left, vec![jobs[2].id]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_file_survives_restart() {
    let dir = tempdir().unwrap();
    let file = QueueFile::new(dir.path().join("queue.json"));
    let engine = Arc::new(ManualEngine::new());
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let handle = Orchestrator::load(&config(1), dyn_engine, file.clone()).unwrap();

    let a = handle.enqueue(NewJob::new("a")).await.unwrap();
    assert_eq!(file.load_records().unwrap().len(), 1);
    engine.wait_started("a").await;
    engine.succeed("a");
    wait_for(&handle, a.id, "completion", |r| r.status() == JobStatus::Complete).await;

    let b = handle.enqueue(NewJob::new("b").with_title("Bee")).await.unwrap();
    engine.wait_started("b").await;
    engine.progress("b", 50);
    wait_for(&handle, b.id, "50%", |r| r.progress() == 50.0).await;

    let at = unix_timestamp() + 3600;
    let c = handle
        .enqueue(NewJob::new("c").scheduled_at(at))
        .await
        .unwrap();
    handle.shutdown().await.unwrap();
    assert!(handle.snapshot().iter().all(|r| !r.is_active()));
    assert_eq!(
        handle.enqueue(NewJob::new("d")).await.unwrap_err(),
        QueueError::Stopped
    );

    let reloaded = file.load().unwrap();
    let records = reloaded.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, a.id);
    assert_eq!(records[0].status(), JobStatus::Complete);
    assert_eq!(records[1].id, b.id);
    assert_eq!(records[1].title, "Bee");
    assert_eq!(records[1].status(), JobStatus::Queued);
    assert_eq!(records[1].progress(), 0.0);
    assert_eq!(records[2].id, c.id);
    assert_eq!(records[2].status(), JobStatus::Scheduled);
    assert_eq!(records[2].scheduled_at(), Some(at));
    assert!(records.iter().all(|r| r.schedule_invariant_holds()));
    assert_eq!(reloaded.snapshot(), file.load().unwrap().snapshot());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_racing_engine_return_never_completes() {
    let engine = Arc::new(ManualEngine::new());
    let handle = spawn(&engine, config(1));
    for round in 0..20 {
        let target = format!("job{round}");
        let job = handle.enqueue(NewJob::new(target.as_str())).await.unwrap();
        engine.wait_started(&target).await;
        engine.succeed(&target);
        let accepted = handle.cancel(job.id).await.is_ok();
        let done = wait_for(&handle, job.id, "terminal status", |r| r.status().is_terminal()).await;
        let expected = if accepted {
            JobStatus::Cancelled
        } else {
            JobStatus::Complete
        };
        assert_eq!(done.status(), expected, "round {round}, cancel accepted: {accepted}");
    }
    handle.shutdown().await.unwrap();
}

/// Reports one tick, then blocks without ever calling back again.
#[derive(Default)]
struct Unresponsive {
    stalled: AtomicBool,
}

impl Engine for Unresponsive {
    fn invoke(
        &self,
        _request: EngineRequest<'_>,
        on_progress: &mut ProgressCallback<'_>,
    ) -> EngineOutcome {
        if on_progress(RawProgress::transfer(30, Some(100), 1.0)).is_err() {
            return EngineOutcome::Aborted;
        }
        self.stalled.store(true, Ordering::Release);
        std::thread::sleep(Duration::from_secs(3));
        EngineOutcome::Success(PathBuf::from("/downloads/late"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_outliving_grace_period_is_persisted_as_queued() {
    let dir = tempdir().unwrap();
    let file = QueueFile::new(dir.path().join("queue.json"));
    let engine = Arc::new(Unresponsive::default());
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let cfg = FetchqConfig {
        shutdown_grace_secs: 1,
        ..config(1)
    };
    let handle = Orchestrator::load(&cfg, dyn_engine, file.clone()).unwrap();

    let job = handle.enqueue(NewJob::new("stuck")).await.unwrap();
    wait_for(&handle, job.id, "30%", |r| r.progress() == 30.0).await;
    while !engine.stalled.load(Ordering::Acquire) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let began = Instant::now();
    handle.shutdown().await.unwrap();
    let waited = began.elapsed();
    assert!(waited >= Duration::from_millis(900), "returned early: {waited:?}");
    assert!(waited < Duration::from_millis(2500), "waited too long: {waited:?}");

    let records = file.load_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status(), JobStatus::Queued);
    assert_eq!(records[0].progress(), 0.0);
}
