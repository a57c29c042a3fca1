//! In-memory work queue and dead-letter queue.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use reconcile::{
    DeadLetter, DeadLetterQueue, NotificationPayload, QueueError, QueueItem, QueueItemId,
    Timestamp, WorkQueue,
};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    claimed: HashMap<QueueItemId, QueueItem>,
}

/// Work queue held in process memory.
///
/// Semantics match [`crate::SpoolQueue`] except that nothing survives a restart.
/// A released item goes back to the front of the queue so it is redelivered
/// before anything enqueued after it.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently leased to a consumer (primarily for tests).
    pub async fn claimed_count(&self) -> usize {
        self.state.lock().await.claimed.len()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, payload: NotificationPayload) -> Result<QueueItemId, QueueError> {
        let item = QueueItem::new(payload);
        let id = item.id;
        self.state.lock().await.pending.push_back(item);
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueueItem>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(item) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.claimed.insert(item.id, item.clone());
        Ok(Some(item))
    }

    async fn delete(&self, id: QueueItemId) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .claimed
            .remove(&id)
            .map(|_| ())
            .ok_or(QueueError::UnknownItem { id })
    }

    async fn release(&self, id: QueueItemId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let item = state
            .claimed
            .remove(&id)
            .ok_or(QueueError::UnknownItem { id })?;
        state.pending.push_front(item);
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }
}

/// Dead letters held in process memory.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterQueue {
    items: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterQueue for MemoryDeadLetterQueue {
    async fn push(&self, item: QueueItem, reason: String) -> Result<(), QueueError> {
        self.items.lock().await.push(DeadLetter {
            item,
            reason,
            dead_lettered_at: Timestamp::now(),
        });
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.items.lock().await.clone())
    }

    async fn take(&self, id: QueueItemId) -> Result<Option<DeadLetter>, QueueError> {
        let mut items = self.items.lock().await;
        Ok(items
            .iter()
            .position(|d| d.item.id == id)
            .map(|idx| items.remove(idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn items_are_claimed_oldest_first() {
        let queue = MemoryQueue::new();
        let first = queue.enqueue("one".into()).await.expect("enqueue");
        let second = queue.enqueue("two".into()).await.expect("enqueue");

        assert_eq!(queue.claim().await.expect("claim").map(|i| i.id), Some(first));
        assert_eq!(queue.claim().await.expect("claim").map(|i| i.id), Some(second));
        assert_eq!(queue.claim().await.expect("claim"), None);
    }

    #[tokio::test]
    async fn released_items_are_redelivered_first() {
        let queue = MemoryQueue::new();
        let first = queue.enqueue("one".into()).await.expect("enqueue");
        queue.enqueue("two".into()).await.expect("enqueue");

        let item = queue.claim().await.expect("claim").expect("pending item");
        assert_eq!(queue.pending_count().await.expect("count"), 1);
        queue.release(item.id).await.expect("release");

        assert_eq!(queue.pending_count().await.expect("count"), 2);
        assert_eq!(queue.claim().await.expect("claim").map(|i| i.id), Some(first));
    }

    #[tokio::test]
    async fn only_claimed_items_can_be_acknowledged() {
        let queue = MemoryQueue::new();
        let id = queue.enqueue("one".into()).await.expect("enqueue");

        assert!(matches!(
            queue.delete(id).await,
            Err(QueueError::UnknownItem { .. })
        ));

        queue.claim().await.expect("claim");
        queue.delete(id).await.expect("delete");
        assert_eq!(queue.claimed_count().await, 0);
        assert!(matches!(
            queue.release(id).await,
            Err(QueueError::UnknownItem { .. })
        ));
    }

    #[tokio::test]
    async fn dead_letters_can_be_taken_back() {
        let dlq = MemoryDeadLetterQueue::new();
        let item = QueueItem::new("{".into());
        let id = item.id;
        dlq.push(item, "malformed".into()).await.expect("push");

        let listed = dlq.list().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reason, "malformed");

        let taken = dlq.take(id).await.expect("take").expect("present");
        assert_eq!(taken.item.payload.as_bytes(), b"{");
        assert!(dlq.take(id).await.expect("take").is_none());
    }
}
