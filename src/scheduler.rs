// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FeedConfig, SchedulerConfig};
use crate::error::SyncError;
use crate::sync::{CycleReport, SyncManager};

/// Something that can run an update cycle for a feed
#[async_trait]
pub trait Updater: Send + Sync {
    async fn update(&self, feed: &FeedConfig) -> Result<CycleReport, SyncError>;
}

#[async_trait]
impl Updater for SyncManager {
    async fn update(&self, feed: &FeedConfig) -> Result<CycleReport, SyncError> {
        SyncManager::update(self, feed).await
    }
}

/// Result of trying to queue an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The feed is already queued or being updated
    AlreadyPending,
    QueueFull,
    Closed,
}

/// Bounded queue of feed updates holding at most one entry per feed
///
/// A feed counts as pending from the moment it is queued until its update
/// has finished, so a feed is never queued twice nor updated concurrently.
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::Sender<FeedConfig>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FeedConfig>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
        };
        (queue, rx)
    }

    /// Queue an update without waiting for room
    pub fn enqueue(&self, feed: &FeedConfig) -> Enqueued {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains(&feed.id) {
            return Enqueued::AlreadyPending;
        }

        match self.tx.try_send(feed.clone()) {
            Ok(()) => {
                pending.insert(feed.id.clone());
                Enqueued::Queued
            }
            Err(TrySendError::Full(_)) => Enqueued::QueueFull,
            Err(TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }

    /// Mark a feed's update as done so it can be queued again
    pub fn finish(&self, feed_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(feed_id);
    }
}

/// Periodically update every feed until `token` is cancelled
///
/// Each feed gets its own timer; the first tick fires right away. Ticks feed
/// a bounded queue drained by `config.workers` workers. When the queue is
/// full or the feed is still pending, the tick is skipped. Cancelling the
/// token drops in-flight updates and returns once every task has stopped.
pub async fn run(
    feeds: Vec<FeedConfig>,
    updater: Arc<dyn Updater>,
    config: &SchedulerConfig,
    token: CancellationToken,
) {
    let (queue, rx) = UpdateQueue::new(config.queue_size);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut tasks = JoinSet::new();

    for worker in 0..config.workers.max(1) {
        tasks.spawn(run_worker(
            worker,
            rx.clone(),
            queue.clone(),
            updater.clone(),
            token.clone(),
        ));
    }

    for feed in feeds {
        tasks.spawn(run_timer(feed, queue.clone(), token.clone()));
    }

    info!(workers = config.workers, "Scheduler started");

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Scheduler task failed");
        }
    }

    info!("Scheduler stopped");
}

async fn run_timer(feed: FeedConfig, queue: UpdateQueue, token: CancellationToken) {
    let mut interval = time::interval(feed.update_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        match queue.enqueue(&feed) {
            Enqueued::Queued => debug!(feed_id = %feed.id, "Queued update"),
            Enqueued::AlreadyPending => {
                debug!(feed_id = %feed.id, "Update still pending, skipping tick");
            }
            Enqueued::QueueFull => {
                warn!(feed_id = %feed.id, "Update queue is full, skipping tick");
            }
            Enqueued::Closed => break,
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<FeedConfig>>>,
    queue: UpdateQueue,
    updater: Arc<dyn Updater>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(feed) = next else {
            break;
        };

        tokio::select! {
            _ = token.cancelled() => {
                info!(worker, feed_id = %feed.id, "Update cancelled");
                queue.finish(&feed.id);
                break;
            }
            result = updater.update(&feed) => match result {
                Ok(report) => info!(
                    worker,
                    feed_id = %feed.id,
                    downloaded = report.downloaded,
                    failed = report.failed,
                    "Update finished"
                ),
                Err(e) => error!(worker, feed_id = %feed.id, error = %e, "Update failed"),
            },
        }

        queue.finish(&feed.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts updates per feed, optionally taking a while for each
    #[derive(Default)]
    struct CountingUpdater {
        delay: Duration,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: bool,
    }

    impl CountingUpdater {
        fn calls_for(&self, feed_id: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|id| *id == feed_id)
                .count()
        }
    }

    #[async_trait]
    impl Updater for CountingUpdater {
        async fn update(&self, feed: &FeedConfig) -> Result<CycleReport, SyncError> {
            self.calls.lock().unwrap().push(feed.id.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(SyncError::Build(BuildError::QuotaExceeded))
            } else {
                Ok(CycleReport::default())
            }
        }
    }

    fn feed(id: &str, period_secs: u64) -> FeedConfig {
        let mut feed = FeedConfig::new(id, format!("https://example.com/{id}.xml"));
        feed.update_period = Duration::from_secs(period_secs);
        feed
    }

    fn config(workers: usize, queue_size: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            queue_size,
        }
    }

    async fn run_for(
        feeds: Vec<FeedConfig>,
        updater: Arc<CountingUpdater>,
        config: SchedulerConfig,
        duration: Duration,
    ) {
        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            let updater: Arc<dyn Updater> = updater;
            tokio::spawn(async move { run(feeds, updater, &config, token).await })
        };

        time::sleep(duration).await;
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn updates_each_feed_on_its_period() {
        let updater = Arc::new(CountingUpdater::default());

        run_for(
            vec![feed("fast", 10), feed("slow", 30)],
            updater.clone(),
            config(1, 16),
            Duration::from_secs(35),
        )
        .await;

        // First tick is immediate
        assert_eq!(updater.calls_for("fast"), 4);
        assert_eq!(updater.calls_for("slow"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_updates_never_overlap_for_one_feed() {
        let updater = Arc::new(CountingUpdater {
            delay: Duration::from_secs(25),
            ..Default::default()
        });

        run_for(
            vec![feed("podcast", 10)],
            updater.clone(),
            config(4, 16),
            Duration::from_secs(100),
        )
        .await;

        assert_eq!(updater.max_in_flight.load(Ordering::SeqCst), 1);
        // Starts at 0, 30, 60 and 90; the ticks in between are skipped
        assert_eq!(updater.calls_for("podcast"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_schedule() {
        let updater = Arc::new(CountingUpdater {
            fail: true,
            ..Default::default()
        });

        run_for(
            vec![feed("podcast", 10)],
            updater.clone(),
            config(1, 16),
            Duration::from_secs(25),
        )
        .await;

        assert_eq!(updater.calls_for("podcast"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_update() {
        let updater = Arc::new(CountingUpdater {
            delay: Duration::from_secs(3600),
            ..Default::default()
        });

        run_for(
            vec![feed("podcast", 7200)],
            updater.clone(),
            config(1, 16),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(updater.calls_for("podcast"), 1);
        // The update future was dropped mid-sleep
        assert_eq!(updater.in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enqueue_deduplicates_pending_feeds() {
        let (queue, mut rx) = UpdateQueue::new(4);
        let podcast = feed("podcast", 10);

        assert_eq!(queue.enqueue(&podcast), Enqueued::Queued);
        assert_eq!(queue.enqueue(&podcast), Enqueued::AlreadyPending);

        // Still pending while being worked on
        let taken = rx.try_recv().unwrap();
        assert_eq!(queue.enqueue(&podcast), Enqueued::AlreadyPending);

        queue.finish(&taken.id);
        assert_eq!(queue.enqueue(&podcast), Enqueued::Queued);
    }

    #[test]
    fn enqueue_skips_when_full() {
        let (queue, mut rx) = UpdateQueue::new(1);

        assert_eq!(queue.enqueue(&feed("a", 10)), Enqueued::Queued);
        assert_eq!(queue.enqueue(&feed("b", 10)), Enqueued::QueueFull);

        // A skipped feed isn't left marked as pending
        let taken = rx.try_recv().unwrap();
        queue.finish(&taken.id);
        assert_eq!(queue.enqueue(&feed("b", 10)), Enqueued::Queued);
    }

    #[test]
    fn enqueue_reports_closed_queue() {
        let (queue, rx) = UpdateQueue::new(1);
        drop(rx);
        assert_eq!(queue.enqueue(&feed("a", 10)), Enqueued::Closed);
    }
}
