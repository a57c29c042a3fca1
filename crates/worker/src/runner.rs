//! The scheduled queue runner.
//!
//! A run claims items one at a time and hands each to the
//! [`NotificationProcessor`]. What happens to the item afterwards depends on
//! the result:
//!
//! | Result | Item |
//! |--------|------|
//! | any [`ProcessOutcome`](crate::ProcessOutcome) | deleted |
//! | non-retryable [`ProcessError`] | dead-lettered, then deleted |
//! | retryable [`ProcessError`] | released; the run stops |
//!
//! A run also stops once the queue is empty or its time budget is spent.

use std::sync::Arc;
use std::time::Duration;

use reconcile::{DeadLetterQueue, QueueError, WorkQueue};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::processor::NotificationProcessor;

/// Default per-run time budget.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(30);

/// Default delay between scheduled runs.
pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(60);

/// Counts of what one run did with the items it claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub handled: usize,
    pub dead_lettered: usize,
    pub released: usize,
}

impl RunSummary {
    pub fn is_idle(&self) -> bool {
        self.handled == 0 && self.dead_lettered == 0 && self.released == 0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handled={} dead_lettered={} released={}",
            self.handled, self.dead_lettered, self.released
        )
    }
}

/// Drains a [`WorkQueue`] through a [`NotificationProcessor`].
pub struct QueueRunner {
    queue: Arc<dyn WorkQueue>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    processor: NotificationProcessor,
    time_budget: Duration,
}

impl QueueRunner {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        processor: NotificationProcessor,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            processor,
            time_budget: DEFAULT_TIME_BUDGET,
        }
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    /// Processes queued items until the queue is empty, the time budget is
    /// spent, or a retryable failure is hit.
    ///
    /// # Errors
    ///
    /// Returns the first [`QueueError`] raised by the queue or the dead-letter
    /// queue. Items already handled in this run stay handled.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn run_once(&self) -> Result<RunSummary, QueueError> {
        let deadline = Instant::now() + self.time_budget;
        let mut summary = RunSummary::default();

        while Instant::now() < deadline {
            let Some(item) = self.queue.claim().await? else {
                break;
            };

            match self.processor.process(&item.payload).await {
                Ok(outcome) => {
                    tracing::debug!(item_id = %item.id, ?outcome, "queue item handled");
                    self.queue.delete(item.id).await?;
                    summary.handled += 1;
                }
                Err(error) if error.retry_policy().is_retryable() => {
                    tracing::warn!(
                        item_id = %item.id,
                        error = %error,
                        "queue item released for redelivery; stopping this run"
                    );
                    self.queue.release(item.id).await?;
                    summary.released += 1;
                    break;
                }
                Err(error) => {
                    let id = item.id;
                    tracing::warn!(
                        item_id = %id,
                        error = %error,
                        "queue item could not be processed; moved to the dead-letter queue"
                    );
                    self.dead_letters.push(item, error.to_string()).await?;
                    self.queue.delete(id).await?;
                    summary.dead_lettered += 1;
                }
            }
        }

        if !summary.is_idle() {
            tracing::info!(
                handled = summary.handled,
                dead_lettered = summary.dead_lettered,
                released = summary.released,
                "queue run finished"
            );
        }
        Ok(summary)
    }

    /// Calls [`run_once`](Self::run_once) every `interval` until `shutdown`
    /// turns `true` or its sender is dropped.
    ///
    /// A failed run is logged and the next tick tries again.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = interval.as_secs(), "queue runner started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.run_once().await {
                        tracing::error!(error = %error, "queue run failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("queue runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crud::CrudManager;
    use crate::lookup::UuidLookup;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use reconcile::{
        ContentStore, LocalRecord, NewRecord, NotificationPayload, RecordField, RecordId,
        StoreError,
    };
    use storage::{MemoryContentStore, MemoryDeadLetterQueue, MemoryQueue};

    struct Harness {
        queue: Arc<MemoryQueue>,
        dead_letters: Arc<MemoryDeadLetterQueue>,
        runner: QueueRunner,
    }

    fn harness(store: Arc<dyn ContentStore>) -> Harness {
        let queue = Arc::new(MemoryQueue::new());
        let dead_letters = Arc::new(MemoryDeadLetterQueue::new());
        let processor = NotificationProcessor::new(
            UuidLookup::new(store.clone()),
            Arc::new(CrudManager::new(store)),
        );
        let runner = QueueRunner::new(queue.clone(), dead_letters.clone(), processor);
        Harness {
            queue,
            dead_letters,
            runner,
        }
    }

    /// Store that is temporarily unreachable.
    struct UnreachableStore;

    #[async_trait]
    impl ContentStore for UnreachableStore {
        async fn create(&self, _: NewRecord) -> Result<LocalRecord, StoreError> {
            Err(StoreError::unavailable("timed out"))
        }
        async fn load(&self, _: RecordId) -> Result<Option<LocalRecord>, StoreError> {
            Err(StoreError::unavailable("timed out"))
        }
        async fn update(&self, _: &LocalRecord) -> Result<LocalRecord, StoreError> {
            Err(StoreError::unavailable("timed out"))
        }
        async fn delete(&self, _: RecordId) -> Result<(), StoreError> {
            Err(StoreError::unavailable("timed out"))
        }
        async fn find_by_field(
            &self,
            _: RecordField,
            _: &str,
        ) -> Result<Vec<LocalRecord>, StoreError> {
            Err(StoreError::unavailable("timed out"))
        }
    }

    #[tokio::test]
    async fn an_empty_queue_is_an_idle_run() {
        let h = harness(Arc::new(MemoryContentStore::new()));
        let summary = h.runner.run_once().await.expect("run");
        assert!(summary.is_idle());
    }

    #[tokio::test]
    async fn handled_items_are_deleted() {
        let h = harness(Arc::new(MemoryContentStore::new()));
        h.queue
            .enqueue(NotificationPayload::from(
                r#"{"uuid":"abc","event":"create","title":"Hello"}"#,
            ))
            .await
            .expect("enqueue");
        h.queue
            .enqueue(NotificationPayload::from(r#"{"event":"create"}"#))
            .await
            .expect("enqueue");
        h.queue
            .enqueue(NotificationPayload::default())
            .await
            .expect("enqueue");

        let summary = h.runner.run_once().await.expect("run");

        assert_eq!(
            summary,
            RunSummary {
                handled: 3,
                dead_lettered: 0,
                released: 0
            }
        );
        assert_eq!(h.queue.pending_count().await.expect("count"), 0);
        assert_eq!(h.queue.claimed_count().await, 0);
    }

    #[tokio::test]
    async fn malformed_items_are_dead_lettered_with_a_reason() {
        let h = harness(Arc::new(MemoryContentStore::new()));
        let id = h
            .queue
            .enqueue(NotificationPayload::from("{broken"))
            .await
            .expect("enqueue");

        let summary = h.runner.run_once().await.expect("run");

        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(h.queue.pending_count().await.expect("count"), 0);
        let dead = h.dead_letters.list().await.expect("list");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].item.id, id);
        assert_eq!(dead[0].item.payload, NotificationPayload::from("{broken"));
        assert!(dead[0].reason.contains("malformed notification payload"));
    }

    #[tokio::test]
    async fn an_unreachable_store_releases_the_item_and_stops() {
        let h = harness(Arc::new(UnreachableStore));
        for _ in 0..2 {
            h.queue
                .enqueue(NotificationPayload::from(
                    r#"{"uuid":"abc","event":"delete"}"#,
                ))
                .await
                .expect("enqueue");
        }

        let summary = h.runner.run_once().await.expect("run");

        assert_eq!(
            summary,
            RunSummary {
                handled: 0,
                dead_lettered: 0,
                released: 1
            }
        );
        assert_eq!(h.queue.pending_count().await.expect("count"), 2);
        assert!(h.dead_letters.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn a_spent_time_budget_leaves_items_queued() {
        let h = harness(Arc::new(MemoryContentStore::new()));
        h.queue
            .enqueue(NotificationPayload::from(
                r#"{"uuid":"abc","event":"create","title":"Hello"}"#,
            ))
            .await
            .expect("enqueue");
        let runner = h.runner.with_time_budget(Duration::ZERO);

        let summary = runner.run_once().await.expect("run");

        assert!(summary.is_idle());
        assert_eq!(h.queue.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn run_stops_when_shutdown_is_signalled() {
        let h = harness(Arc::new(MemoryContentStore::new()));
        h.queue
            .enqueue(NotificationPayload::from(
                r#"{"uuid":"abc","event":"create","title":"Hello"}"#,
            ))
            .await
            .expect("enqueue");
        let (tx, rx) = watch::channel(false);
        let runner = Arc::new(h.runner);

        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run(Duration::from_secs(60), rx).await }
        });

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.queue.pending_count().await.expect("count"), 0);

        tx.send(true).expect("runner is listening");
        task.await.expect("runner exits cleanly");
    }
}
