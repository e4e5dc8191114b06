//! Tests for the queue store and queue file.

use std::path::PathBuf;

use crate::error::QueueError;
use crate::failure::{FailureKind, JobError};
use crate::job::{JobStatus, NewJob, ProgressUpdate};
use crate::queue::{QueueFile, QueueStore};

const NOW: i64 = 1_700_000_000;

fn store_with(n: usize) -> QueueStore {
    let mut store = QueueStore::new();
    for i in 0..n {
        store.enqueue(NewJob::new(format!("https://example.com/{i}")), NOW);
    }
    store
}

fn ids(store: &QueueStore) -> Vec<u64> {
    store.records().iter().map(|r| r.id).collect()
}

#[test]
fn enqueue_assigns_increasing_ids_in_order() {
    let mut store = store_with(2);
    let batch = store.enqueue_batch(
        vec![NewJob::new("a").with_title("A"), NewJob::new("b")],
        NOW,
    );
    assert_eq!(batch.len(), 2);
    assert_eq!(ids(&store), vec![1, 2, 3, 4]);
    assert_eq!(store.get(3).unwrap().title, "A");
    assert_eq!(store.next_eligible(), Some(1));
}

#[test]
fn future_activation_enqueues_as_scheduled() {
    let mut store = QueueStore::new();
    let r = store.enqueue(NewJob::new("x").scheduled_at(NOW + 60), NOW);
    assert_eq!(r.status(), JobStatus::Scheduled);
    assert_eq!(store.next_eligible(), None);
    assert_eq!(store.promote_due(NOW + 59), Vec::<u64>::new());
    assert_eq!(store.promote_due(NOW + 60), vec![r.id]);
    assert_eq!(store.next_eligible(), Some(r.id));
}

#[test]
fn reorder_moves_and_clamps() {
    let mut store = store_with(4);
    assert_eq!(store.reorder(4, -1).unwrap(), 2);
    assert_eq!(ids(&store), vec![1, 2, 4, 3]);
    assert_eq!(store.reorder(1, 10).unwrap(), 3);
    assert_eq!(ids(&store), vec![2, 4, 3, 1]);
    assert_eq!(store.reorder(3, -99).unwrap(), 0);
    assert_eq!(ids(&store), vec![3, 2, 4, 1]);
    assert_eq!(store.reorder(9, 1), Err(QueueError::NotFound(9)));
}

#[test]
fn remove_is_all_or_nothing() {
    let mut store = store_with(3);
    assert_eq!(store.remove(&[1, 42]), Err(QueueError::NotFound(42)));
    assert_eq!(store.len(), 3);
    let removed = store.remove(&[1, 3]).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(ids(&store), vec![2]);
}

#[test]
fn schedule_only_from_queued_or_scheduled() {
    let mut store = store_with(2);
    let r = store.schedule(1, NOW + 10, NOW).unwrap();
    assert_eq!(r.scheduled_at(), Some(NOW + 10));
    let r = store.schedule(1, NOW + 20, NOW).unwrap();
    assert_eq!(r.scheduled_at(), Some(NOW + 20));
    assert_eq!(
        store.schedule(2, NOW, NOW),
        Err(QueueError::ScheduleInPast { at: NOW })
    );
    store.admit(2).unwrap();
    assert!(matches!(
        store.schedule(2, NOW + 5, NOW),
        Err(QueueError::InvalidTransition { .. })
    ));
}

#[test]
fn retry_resets_only_failed_and_cancelled() {
    let mut store = store_with(3);
    for id in 1..=3 {
        store.admit(id).unwrap();
    }
    store.fail(1, JobError::from_engine("HTTP 503")).unwrap();
    store.cancel(2).unwrap();
    store.complete(3, PathBuf::from("/tmp/3")).unwrap();

    let retried = store.retry(&[1, 3]).unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(store.get(1).unwrap().status(), JobStatus::Queued);
    assert!(store.get(1).unwrap().error().is_none());
    assert_eq!(store.get(3).unwrap().status(), JobStatus::Complete);

    let all = store.retry_all_failed();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
}

#[test]
fn clear_completed_removes_every_finished_status() {
    let mut store = store_with(5);
    for id in 1..=4 {
        store.admit(id).unwrap();
    }
    store.complete(1, PathBuf::from("/tmp/1")).unwrap();
    store.fail(2, JobError::insufficient_storage("full")).unwrap();
    store.cancel(3).unwrap();
    let removed = store.clear_completed();
    assert_eq!(removed.len(), 3);
    assert_eq!(ids(&store), vec![4, 5]);
    assert_eq!(store.active_count(), 1);
    assert_eq!(store.count_with(JobStatus::Queued), 1);
}

#[test]
fn progress_is_applied_only_to_active_jobs() {
    let mut store = store_with(2);
    store.admit(1).unwrap();
    let tick = ProgressUpdate {
        percent: Some(12.5),
        transfer_rate: Some(10.0),
        estimated_remaining: Some(1.0),
        status: JobStatus::Downloading,
    };
    let updated = store.apply_progress(1, &tick).unwrap();
    assert_eq!(updated.status(), JobStatus::Downloading);
    assert_eq!(updated.progress(), 12.5);
    assert!(store.apply_progress(1, &tick).is_none());
    assert!(store.apply_progress(2, &tick).is_none());
    assert!(store.apply_progress(99, &tick).is_none());
}

#[test]
fn pause_requires_an_active_job() {
    let mut store = store_with(1);
    assert_eq!(store.set_paused(1, true), Err(QueueError::NotActive(1)));
    store.admit(1).unwrap();
    assert!(store.set_paused(1, true).unwrap().is_paused());
}

#[test]
fn queue_file_roundtrip_and_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let file = QueueFile::new(dir.path().join("state").join("queue.json"));
    assert!(file.load().unwrap().is_empty());

    let mut store = store_with(3);
    store.admit(1).unwrap();
    store.schedule(2, NOW + 3600, NOW).unwrap();
    store.admit(3).unwrap();
    store.fail(3, JobError::from_engine("HTTP 404 not found")).unwrap();
    file.save(&store).unwrap();

    let loaded = file.load().unwrap();
    assert_eq!(ids(&loaded), vec![1, 2, 3]);
    assert_eq!(loaded.get(1).unwrap().status(), JobStatus::Queued);
    assert_eq!(loaded.get(2).unwrap().scheduled_at(), Some(NOW + 3600));
    assert_eq!(
        loaded.get(3).unwrap().error().map(|e| e.kind),
        Some(FailureKind::ResourceUnavailable)
    );
    assert!(loaded.records().iter().all(|r| r.schedule_invariant_holds()));

    let mut loaded = loaded;
    assert_eq!(loaded.enqueue(NewJob::new("next"), NOW).id, 4);
}

#[test]
fn queue_file_uses_documented_field_names() {
    let dir = tempfile::tempdir().unwrap();
    let file = QueueFile::new(dir.path().join("queue.json"));
    let mut store = QueueStore::new();
    store.enqueue(NewJob::new("https://example.com/a").scheduled_at(NOW + 5), NOW);
    file.save(&store).unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(file.path()).unwrap()).unwrap();
    let job = &raw[0];
    assert_eq!(job["url"], "https://example.com/a");
    assert_eq!(job["status"], "Scheduled");
    assert_eq!(job["scheduled_time"], NOW + 5);
    assert!(job.get("paused").is_none());
}

#[test]
fn malformed_queue_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(QueueFile::new(&path).load().is_err());
    std::fs::write(&path, "  \n").unwrap();
    assert!(QueueFile::new(&path).load().unwrap().is_empty());
}

#[test]
fn duplicate_ids_on_disk_are_renumbered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    std::fs::write(
        &path,
        r#"[{"id":5,"url":"a","status":"Queued"},{"id":5,"url":"b","status":"Queued"}]"#,
    )
    .unwrap();
    let store = QueueFile::new(&path).load().unwrap();
    assert_eq!(ids(&store), vec![5, 6]);
}
