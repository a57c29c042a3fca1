//! Port traits implemented by the infrastructure crates.
//!
//! The worker and the listener depend only on these traits. Concrete adapters
//! (in-memory, file-backed) live in the `storage` crate and are injected as
//! `Arc<dyn Trait>` by the composition root.

use async_trait::async_trait;

use crate::{
    DeadLetter, LocalRecord, NewRecord, NotificationPayload, QueueError, QueueItem, QueueItemId,
    RecordField, RecordId, SettingsError, StoreError,
};

/// Generic CRUD and property lookup over local records.
///
/// Implementations do not enforce uniqueness of [`RecordField::WebhookUuid`];
/// callers check for an existing record before creating one.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persists a new record and returns it with its assigned id and timestamps.
    async fn create(&self, record: NewRecord) -> Result<LocalRecord, StoreError>;

    /// Loads a record by its internal id.
    async fn load(&self, id: RecordId) -> Result<Option<LocalRecord>, StoreError>;

    /// Overwrites the stored title and body of `record` and refreshes its
    /// `changed` timestamp.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the record no longer exists;
    /// [`StoreError::Conflict`] if `record.uuid` differs from the stored uuid.
    async fn update(&self, record: &LocalRecord) -> Result<LocalRecord, StoreError>;

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the record does not exist.
    async fn delete(&self, id: RecordId) -> Result<(), StoreError>;

    /// Returns every record whose `field` equals `value`, in ascending id order.
    async fn find_by_field(
        &self,
        field: RecordField,
        value: &str,
    ) -> Result<Vec<LocalRecord>, StoreError>;
}

/// Durable queue of opaque notification payloads.
///
/// Items are leased by [`WorkQueue::claim`] and must then be either
/// acknowledged with [`WorkQueue::delete`] or handed back with
/// [`WorkQueue::release`]. No ordering guarantee is made beyond "oldest
/// pending item first" for a single consumer.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Adds a payload to the queue without inspecting it.
    async fn enqueue(&self, payload: NotificationPayload) -> Result<QueueItemId, QueueError>;

    /// Leases the oldest pending item, or returns `None` if nothing is pending.
    async fn claim(&self) -> Result<Option<QueueItem>, QueueError>;

    /// Acknowledges a claimed item, removing it permanently.
    async fn delete(&self, id: QueueItemId) -> Result<(), QueueError>;

    /// Returns a claimed item to the pending set for redelivery.
    async fn release(&self, id: QueueItemId) -> Result<(), QueueError>;

    /// Number of items waiting to be claimed.
    async fn pending_count(&self) -> Result<usize, QueueError>;
}

/// Holding area for items that failed permanently.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn push(&self, item: QueueItem, reason: String) -> Result<(), QueueError>;

    /// All dead letters, oldest first.
    async fn list(&self) -> Result<Vec<DeadLetter>, QueueError>;

    /// Removes a dead letter and returns it (e.g. to re-enqueue its payload).
    async fn take(&self, id: QueueItemId) -> Result<Option<DeadLetter>, QueueError>;
}

/// Source of the expected webhook access token.
///
/// Read on every access check so a changed token applies immediately.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the configured token, or `None` if no token has been set.
    async fn expected_token(&self) -> Result<Option<String>, SettingsError>;
}
