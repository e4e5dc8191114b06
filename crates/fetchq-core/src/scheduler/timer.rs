//! Deferred activation: promote scheduled jobs whose time has come.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::job::JobRecord;
use crate::queue::SharedQueue;

/// Promote every due `Scheduled` record to `Queued`. `now` is wall-clock Unix
/// seconds; activation times are wall-clock values set by the operator.
pub(crate) fn promote_due(queue: &SharedQueue, now: i64) -> Vec<JobRecord> {
    let mut store = queue.write();
    let promoted = store.promote_due(now);
    promoted
        .iter()
        .filter_map(|id| store.get(*id).cloned())
        .collect()
}

/// Periodic tick whose first firing is one `period` from now. A late tick is
/// not followed by a burst of catch-up ticks.
pub(crate) fn ticker(period: Duration) -> Interval {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, NewJob};
    use crate::queue::QueueStore;

    #[test]
    fn promotes_only_due_records() {
        let mut store = QueueStore::new();
        store.enqueue(NewJob::new("soon").scheduled_at(110), 100);
        store.enqueue(NewJob::new("later").scheduled_at(500), 100);
        store.enqueue(NewJob::new("now"), 100);
        let queue = SharedQueue::new(store);

        assert!(promote_due(&queue, 109).is_empty());
        let promoted = promote_due(&queue, 110);
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].target, "soon");
        assert_eq!(promoted[0].status(), JobStatus::Queued);
        assert_eq!(promoted[0].scheduled_at(), None);
        assert_eq!(queue.get(2).unwrap().status(), JobStatus::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_one_period_first() {
        let start = Instant::now();
        let mut tick = ticker(Duration::from_secs(10));
        tick.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
