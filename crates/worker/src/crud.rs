//! Create, update, and delete of local records driven by notifications.
//!
//! [`EntityCrud`] is the seam between the notification processor and the
//! store; [`CrudManager`] is its production implementation.
//!
//! Every operation is attempted once. Store failures are logged as warnings and
//! returned as [`CrudError`]; the processor treats the notification as handled
//! either way, so a failed write is never retried.

use std::sync::Arc;

use async_trait::async_trait;
use reconcile::{
    ContentStore, ExternalUuid, FieldValues, FormattedText, LocalRecord, NewRecord,
    NotificationData, RecordId, StoreError, TextFormat, WEBHOOK_RECORD_TYPE,
};
use thiserror::Error;

/// A store write issued for a notification failed.
#[derive(Debug, Error)]
pub enum CrudError {
    #[error("record for webhook entity {uuid} could not be created: {source}")]
    Create {
        uuid: ExternalUuid,
        #[source]
        source: StoreError,
    },

    #[error("record {id} could not be updated: {source}")]
    Update {
        id: RecordId,
        #[source]
        source: StoreError,
    },

    #[error("record {id} could not be deleted: {source}")]
    Delete {
        id: RecordId,
        #[source]
        source: StoreError,
    },
}

/// Record mutations the notification processor dispatches to.
#[async_trait]
pub trait EntityCrud: Send + Sync {
    /// Creates a record for `data.uuid`.
    ///
    /// Returns `Ok(None)` without touching the store when the notification has
    /// no usable title.
    async fn create(&self, data: &NotificationData) -> Result<Option<LocalRecord>, CrudError>;

    /// Applies `data` to `existing`.
    ///
    /// Returns `Ok(None)` when nothing changed and nothing was written.
    async fn update(
        &self,
        existing: LocalRecord,
        data: &NotificationData,
    ) -> Result<Option<LocalRecord>, CrudError>;

    /// Deletes `existing` from the store.
    ///
    /// The success event is logged at INFO only once the store has confirmed
    /// the delete; a failed delete logs a warning instead, never both.
    async fn delete(&self, existing: LocalRecord) -> Result<(), CrudError>;
}

/// Maps notification values onto store fields.
///
/// Only non-empty values are carried. The body is tagged with `body_format`.
pub fn map_field_data(data: &NotificationData, body_format: TextFormat) -> FieldValues {
    FieldValues {
        title: data.non_empty_title().map(str::to_owned),
        body: data
            .non_empty_body()
            .map(|value| FormattedText::new(value, body_format)),
    }
}

/// [`EntityCrud`] backed by a [`ContentStore`].
#[derive(Clone)]
pub struct CrudManager {
    store: Arc<dyn ContentStore>,
    body_format: TextFormat,
}

impl CrudManager {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            body_format: TextFormat::default(),
        }
    }

    /// Overrides the text format stamped onto created bodies.
    pub fn with_body_format(mut self, body_format: TextFormat) -> Self {
        self.body_format = body_format;
        self
    }
}

#[async_trait]
impl EntityCrud for CrudManager {
    #[tracing::instrument(level = "debug", skip_all, fields(uuid = %data.uuid))]
    async fn create(&self, data: &NotificationData) -> Result<Option<LocalRecord>, CrudError> {
        let values = map_field_data(data, self.body_format);

        // The uuid was checked by the processor; the title is the only other
        // value a record cannot exist without.
        let Some(title) = values.title else {
            tracing::debug!(uuid = %data.uuid, "create notification has no title; nothing created");
            return Ok(None);
        };

        let new = NewRecord {
            uuid: data.uuid.clone(),
            record_type: WEBHOOK_RECORD_TYPE.to_owned(),
            title,
            body: values.body,
        };

        match self.store.create(new).await {
            Ok(record) => {
                tracing::info!(
                    record_id = %record.id,
                    uuid = %data.uuid,
                    "record created to represent webhook entity"
                );
                Ok(Some(record))
            }
            Err(source) => {
                tracing::warn!(
                    uuid = %data.uuid,
                    error = %source,
                    "a record could not be created to represent webhook entity"
                );
                Err(CrudError::Create {
                    uuid: data.uuid.clone(),
                    source,
                })
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(record_id = %existing.id))]
    async fn update(
        &self,
        existing: LocalRecord,
        data: &NotificationData,
    ) -> Result<Option<LocalRecord>, CrudError> {
        let mut record = existing;
        let mut changed = false;

        // Only fields the record already has are overwritten; an update never
        // initialises a field that was left empty at creation.
        if record.has_title() {
            if let Some(title) = data.non_empty_title() {
                if record.title.as_deref() != Some(title) {
                    record.title = Some(title.to_owned());
                    changed = true;
                }
            }
        }
        if record.has_body() {
            if let (Some(body), Some(value)) = (record.body.as_mut(), data.non_empty_body()) {
                if body.value != value {
                    body.value = value.to_owned();
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(None);
        }

        match self.store.update(&record).await {
            Ok(saved) => {
                tracing::info!(record_id = %saved.id, "record updated via webhook notification");
                Ok(Some(saved))
            }
            Err(source) => {
                tracing::warn!(
                    record_id = %record.id,
                    uuid = %record.uuid,
                    error = %source,
                    "record could not be updated via webhook notification"
                );
                Err(CrudError::Update {
                    id: record.id,
                    source,
                })
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(record_id = %existing.id))]
    async fn delete(&self, existing: LocalRecord) -> Result<(), CrudError> {
        match self.store.delete(existing.id).await {
            Ok(()) => {
                tracing::info!(record_id = %existing.id, "record deleted via webhook notification");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(
                    record_id = %existing.id,
                    uuid = %existing.uuid,
                    error = %source,
                    "record could not be deleted via webhook notification"
                );
                Err(CrudError::Delete {
                    id: existing.id,
                    source,
                })
            }
        }
    }
}
