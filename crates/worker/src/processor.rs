//! Per-item notification processing.
//!
//! [`NotificationProcessor::process`] walks one payload through the decision
//! tree: blank payload, decode, uuid presence, existence lookup, then event
//! dispatch. UUID presence is always checked before the event is interpreted,
//! and existence before any event-specific action.

use std::sync::Arc;

use reconcile::{
    decode_payload, DecodeError, DecodedPayload, EventKind, ExternalUuid, IgnoredKeys,
    NotificationPayload, RecordId, RetryPolicy, StoreError,
};
use thiserror::Error;

use crate::crud::{CrudError, EntityCrud};
use crate::lookup::UuidLookup;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// The terminal state one payload reached.
///
/// Every variant means the item is handled and must not be redelivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The payload was blank.
    Empty,
    /// The notification carried no usable uuid.
    MissingUuid,
    Created { uuid: ExternalUuid, record_id: RecordId },
    /// A create notification without a title; nothing was written.
    CreateSkipped { uuid: ExternalUuid },
    /// A create for a uuid that already has a record.
    DuplicateCreate { uuid: ExternalUuid, record_id: RecordId },
    Updated { uuid: ExternalUuid, record_id: RecordId },
    /// An update that changed no field.
    Unchanged { uuid: ExternalUuid, record_id: RecordId },
    Deleted { uuid: ExternalUuid, record_id: RecordId },
    /// An update, delete, or other event for a uuid with no record.
    MissingTarget { uuid: ExternalUuid, event: EventKind },
    /// An event other than create, update, or delete for an existing record.
    UnsupportedEvent { uuid: ExternalUuid, event: EventKind },
    /// The store rejected the write. Already logged; not retried.
    StoreFailed { uuid: ExternalUuid, message: String },
}

/// A payload could not be taken to a terminal state.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The uuid lookup could not reach the store.
    #[error("looking up webhook entity {uuid} failed: {source}")]
    Lookup {
        uuid: ExternalUuid,
        #[source]
        source: StoreError,
    },
}

impl ProcessError {
    /// Decode failures never succeed on a retry; lookup failures follow the
    /// store's own classification.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ProcessError::Decode(_) => RetryPolicy::NonRetryable,
            ProcessError::Lookup { source, .. } => source.retry_policy(),
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Decides and dispatches the record operation for one queued payload.
#[derive(Clone)]
pub struct NotificationProcessor {
    lookup: UuidLookup,
    crud: Arc<dyn EntityCrud>,
    ignored_keys: IgnoredKeys,
}

impl NotificationProcessor {
    pub fn new(lookup: UuidLookup, crud: Arc<dyn EntityCrud>) -> Self {
        Self {
            lookup,
            crud,
            ignored_keys: IgnoredKeys::default(),
        }
    }

    /// Replaces the default denylist of payload keys.
    pub fn with_ignored_keys(mut self, ignored_keys: IgnoredKeys) -> Self {
        self.ignored_keys = ignored_keys;
        self
    }

    /// Processes one payload to a terminal state.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Decode`] when the payload is not a JSON notification.
    /// - [`ProcessError::Lookup`] when the store cannot be queried.
    ///
    /// Store failures during a write are not errors here: they are logged by
    /// the [`EntityCrud`] implementation and reported as
    /// [`ProcessOutcome::StoreFailed`].
    #[tracing::instrument(level = "debug", skip_all, fields(payload_len = payload.len()))]
    pub async fn process(
        &self,
        payload: &NotificationPayload,
    ) -> Result<ProcessOutcome, ProcessError> {
        let decoded = match decode_payload(payload)? {
            DecodedPayload::Empty => return Ok(ProcessOutcome::Empty),
            DecodedPayload::Notification(decoded) => decoded,
        };

        let Some(data) = decoded.into_notification(&self.ignored_keys) else {
            tracing::warn!("webhook notification received but not processed because uuid was missing");
            return Ok(ProcessOutcome::MissingUuid);
        };
        let uuid = data.uuid.clone();

        let existing = self
            .lookup
            .find_by_uuid(&uuid)
            .await
            .map_err(|source| ProcessError::Lookup {
                uuid: uuid.clone(),
                source,
            })?;

        let outcome = match (&data.event, existing) {
            (EventKind::Create, None) => match self.crud.create(&data).await {
                Ok(Some(record)) => ProcessOutcome::Created {
                    uuid,
                    record_id: record.id,
                },
                Ok(None) => ProcessOutcome::CreateSkipped { uuid },
                Err(e) => store_failed(uuid, e),
            },
            (EventKind::Create, Some(record)) => {
                tracing::warn!(
                    uuid = %uuid,
                    record_id = %record.id,
                    "webhook create notification received but corresponding record already exists"
                );
                ProcessOutcome::DuplicateCreate {
                    uuid,
                    record_id: record.id,
                }
            }
            (event, None) => {
                tracing::warn!(
                    uuid = %uuid,
                    event = %event.as_str(),
                    "webhook notification received but no corresponding record exists"
                );
                ProcessOutcome::MissingTarget {
                    uuid,
                    event: event.clone(),
                }
            }
            (EventKind::Update, Some(record)) => {
                let record_id = record.id;
                match self.crud.update(record, &data).await {
                    Ok(Some(_)) => ProcessOutcome::Updated { uuid, record_id },
                    Ok(None) => ProcessOutcome::Unchanged { uuid, record_id },
                    Err(e) => store_failed(uuid, e),
                }
            }
            (EventKind::Delete, Some(record)) => {
                let record_id = record.id;
                match self.crud.delete(record).await {
                    Ok(()) => ProcessOutcome::Deleted { uuid, record_id },
                    Err(e) => store_failed(uuid, e),
                }
            }
            (EventKind::Other(event), Some(record)) => {
                tracing::debug!(
                    uuid = %uuid,
                    record_id = %record.id,
                    event = %event,
                    "unsupported webhook event ignored"
                );
                ProcessOutcome::UnsupportedEvent {
                    uuid,
                    event: EventKind::Other(event.clone()),
                }
            }
        };

        Ok(outcome)
    }
}

fn store_failed(uuid: ExternalUuid, error: CrudError) -> ProcessOutcome {
    ProcessOutcome::StoreFailed {
        uuid,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use reconcile::{
        ContentStore, FormattedText, LocalRecord, NewRecord, NotificationData, RecordField,
        TextFormat, WEBHOOK_RECORD_TYPE,
    };
    use std::sync::Mutex;
    use storage::MemoryContentStore;
    use tracing_test::traced_test;

    use crate::crud::CrudManager;

    fn processor(store: Arc<MemoryContentStore>) -> NotificationProcessor {
        NotificationProcessor::new(
            UuidLookup::new(store.clone()),
            Arc::new(CrudManager::new(store)),
        )
    }

    fn payload(value: serde_json::Value) -> NotificationPayload {
        NotificationPayload::new(value.to_string())
    }

    async fn seed(store: &MemoryContentStore, title: &str, body: Option<&str>) -> LocalRecord {
        store
            .create(NewRecord {
                uuid: ExternalUuid::new("abc").expect("non-empty"),
                record_type: WEBHOOK_RECORD_TYPE.to_owned(),
                title: title.to_owned(),
                body: body.map(|b| FormattedText::new(b, TextFormat::BasicHtml)),
            })
            .await
            .expect("create")
    }

    /// Records every call and never touches a store.
    #[derive(Default)]
    struct RecordingCrud {
        created: Mutex<Vec<NotificationData>>,
    }

    #[async_trait]
    impl EntityCrud for RecordingCrud {
        async fn create(
            &self,
            data: &NotificationData,
        ) -> Result<Option<LocalRecord>, CrudError> {
            self.created.lock().expect("lock").push(data.clone());
            Ok(None)
        }

        async fn update(
            &self,
            _existing: LocalRecord,
            _data: &NotificationData,
        ) -> Result<Option<LocalRecord>, CrudError> {
            Ok(None)
        }

        async fn delete(&self, _existing: LocalRecord) -> Result<(), CrudError> {
            Ok(())
        }
    }

    /// Store whose uuid queries always fail.
    struct FailingLookupStore {
        retryable: bool,
    }

    #[async_trait]
    impl ContentStore for FailingLookupStore {
        async fn create(&self, _: NewRecord) -> Result<LocalRecord, StoreError> {
            unreachable!("lookup fails first")
        }
        async fn load(&self, _: RecordId) -> Result<Option<LocalRecord>, StoreError> {
            unreachable!("not used by the processor")
        }
        async fn update(&self, _: &LocalRecord) -> Result<LocalRecord, StoreError> {
            unreachable!("lookup fails first")
        }
        async fn delete(&self, _: RecordId) -> Result<(), StoreError> {
            unreachable!("lookup fails first")
        }
        async fn find_by_field(
            &self,
            _: RecordField,
            _: &str,
        ) -> Result<Vec<LocalRecord>, StoreError> {
            if self.retryable {
                Err(StoreError::unavailable("connection refused"))
            } else {
                Err(StoreError::backend("index corrupt"))
            }
        }
    }

    #[tokio::test]
    async fn blank_payloads_are_a_no_op() {
        let store = Arc::new(MemoryContentStore::new());
        let outcome = processor(store.clone())
            .process(&NotificationPayload::default())
            .await
            .expect("no error");

        assert_eq!(outcome, ProcessOutcome::Empty);
        assert!(store.all_records().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_payloads_fail_without_retry() {
        let store = Arc::new(MemoryContentStore::new());
        let err = processor(store)
            .process(&NotificationPayload::from("{not json"))
            .await
            .expect_err("malformed");

        assert!(matches!(err, ProcessError::Decode(_)));
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_uuid_only_logs_a_warning() {
        let store = Arc::new(MemoryContentStore::new());
        let outcome = processor(store.clone())
            .process(&payload(serde_json::json!({"event": "create", "title": "Hello"})))
            .await
            .expect("no error");

        assert_eq!(outcome, ProcessOutcome::MissingUuid);
        assert!(store.all_records().await.is_empty());
        assert!(logs_contain("not processed because uuid was missing"));
    }

    #[tokio::test]
    async fn uuid_is_checked_before_the_event() {
        let store = Arc::new(MemoryContentStore::new());
        let outcome = processor(store)
            .process(&payload(serde_json::json!({"uuid": "  ", "event": "bogus"})))
            .await
            .expect("no error");

        assert_eq!(outcome, ProcessOutcome::MissingUuid);
    }

    #[tokio::test]
    async fn create_for_a_new_uuid_creates_one_record() {
        let store = Arc::new(MemoryContentStore::new());
        let outcome = processor(store.clone())
            .process(&payload(serde_json::json!({
                "uuid": "abc", "event": "create", "title": "Hello", "body": "World"
            })))
            .await
            .expect("no error");

        let records = store.all_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(
            outcome,
            ProcessOutcome::Created {
                uuid: ExternalUuid::new("abc").expect("non-empty"),
                record_id: records[0].id,
            }
        );
    }

    #[tokio::test]
    async fn create_without_title_is_skipped() {
        let store = Arc::new(MemoryContentStore::new());
        let outcome = processor(store.clone())
            .process(&payload(serde_json::json!({"uuid": "abc", "event": "create"})))
            .await
            .expect("no error");

        assert!(matches!(outcome, ProcessOutcome::CreateSkipped { .. }));
        assert!(store.all_records().await.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn duplicate_create_warns_and_leaves_the_record_alone() {
        let store = Arc::new(MemoryContentStore::new());
        let existing = seed(&store, "Original", Some("Body")).await;

        let outcome = processor(store.clone())
            .process(&payload(serde_json::json!({
                "uuid": "abc", "event": "create", "title": "Replacement"
            })))
            .await
            .expect("no error");

        assert_eq!(
            outcome,
            ProcessOutcome::DuplicateCreate {
                uuid: existing.uuid.clone(),
                record_id: existing.id,
            }
        );
        assert_eq!(store.all_records().await, vec![existing]);
        assert!(logs_contain("corresponding record already exists"));
    }

    #[tokio::test]
    #[traced_test]
    async fn update_and_delete_without_a_record_change_nothing() {
        let store = Arc::new(MemoryContentStore::new());
        let processor = processor(store.clone());

        for event in ["update", "delete", "archive"] {
            let outcome = processor
                .process(&payload(serde_json::json!({"uuid": "abc", "event": event})))
                .await
                .expect("no error");
            assert!(matches!(outcome, ProcessOutcome::MissingTarget { .. }));
        }

        assert!(store.all_records().await.is_empty());
        assert!(logs_contain("no corresponding record exists"));
    }

    #[tokio::test]
    async fn update_dispatches_to_the_existing_record() {
        let store = Arc::new(MemoryContentStore::new());
        let existing = seed(&store, "Old", None).await;
        let processor = processor(store.clone());

        let outcome = processor
            .process(&payload(serde_json::json!({
                "uuid": "abc", "event": "update", "title": "New"
            })))
            .await
            .expect("no error");
        assert_eq!(
            outcome,
            ProcessOutcome::Updated {
                uuid: existing.uuid.clone(),
                record_id: existing.id,
            }
        );

        let outcome = processor
            .process(&payload(serde_json::json!({
                "uuid": "abc", "event": "update", "title": "New"
            })))
            .await
            .expect("no error");
        assert!(matches!(outcome, ProcessOutcome::Unchanged { .. }));
    }

    #[tokio::test]
    async fn delete_removes_the_existing_record() {
        let store = Arc::new(MemoryContentStore::new());
        let existing = seed(&store, "Title", None).await;

        let outcome = processor(store.clone())
            .process(&payload(serde_json::json!({"uuid": "abc", "event": "delete"})))
            .await
            .expect("no error");

        assert_eq!(
            outcome,
            ProcessOutcome::Deleted {
                uuid: existing.uuid,
                record_id: existing.id,
            }
        );
        assert!(store.all_records().await.is_empty());
    }

    #[tokio::test]
    async fn unsupported_events_on_existing_records_are_ignored() {
        let store = Arc::new(MemoryContentStore::new());
        let existing = seed(&store, "Title", None).await;

        let outcome = processor(store.clone())
            .process(&payload(serde_json::json!({
                "uuid": "abc", "event": "publish", "title": "Changed"
            })))
            .await
            .expect("no error");

        assert_eq!(
            outcome,
            ProcessOutcome::UnsupportedEvent {
                uuid: existing.uuid.clone(),
                event: EventKind::Other("publish".into()),
            }
        );
        assert_eq!(store.all_records().await, vec![existing]);
    }

    #[tokio::test]
    async fn denylisted_keys_never_reach_the_crud_layer() {
        let store = Arc::new(MemoryContentStore::new());
        let crud = Arc::new(RecordingCrud::default());
        let processor = NotificationProcessor::new(UuidLookup::new(store), crud.clone())
            .with_ignored_keys(IgnoredKeys::new(["an_unused_value", "secret"]));

        processor
            .process(&payload(serde_json::json!({
                "uuid": "abc",
                "event": "create",
                "title": "Hello",
                "an_unused_value": 1,
                "secret": "s3cr3t",
                "kept": true,
            })))
            .await
            .expect("no error");

        let created = crud.created.lock().expect("lock");
        assert_eq!(created.len(), 1);
        let keys: Vec<&str> = created[0].extra.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["kept"]);
    }

    #[tokio::test]
    async fn lookup_failures_carry_the_store_retry_policy() {
        for retryable in [true, false] {
            let store = Arc::new(FailingLookupStore { retryable });
            let processor = NotificationProcessor::new(
                UuidLookup::new(store.clone()),
                Arc::new(CrudManager::new(store)),
            );

            let err = processor
                .process(&payload(serde_json::json!({"uuid": "abc", "event": "update"})))
                .await
                .expect_err("lookup fails");

            assert!(matches!(err, ProcessError::Lookup { .. }));
            assert_eq!(err.retry_policy().is_retryable(), retryable);
        }
    }
}
