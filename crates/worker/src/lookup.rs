//! Resolution of an external UUID to the local record it correlates with.

use std::sync::Arc;

use reconcile::{ContentStore, ExternalUuid, LocalRecord, RecordField, StoreError};

/// Finds the local record bound to an [`ExternalUuid`].
#[derive(Clone)]
pub struct UuidLookup {
    store: Arc<dyn ContentStore>,
}

impl UuidLookup {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Returns the record whose webhook uuid equals `uuid`, if any.
    ///
    /// Should the store ever hold more than one match, a data-integrity warning
    /// is logged and the record with the lowest id is returned.
    ///
    /// # Errors
    ///
    /// Propagates the store's error unchanged; [`StoreError::Unavailable`] is
    /// retryable.
    #[tracing::instrument(level = "debug", skip(self), fields(uuid = %uuid))]
    pub async fn find_by_uuid(&self, uuid: &ExternalUuid) -> Result<Option<LocalRecord>, StoreError> {
        let mut matches = self
            .store
            .find_by_field(RecordField::WebhookUuid, uuid.as_str())
            .await?;

        if matches.len() > 1 {
            let ids: Vec<String> = matches.iter().map(|r| r.id.to_string()).collect();
            tracing::warn!(
                uuid = %uuid,
                record_ids = %ids.join(","),
                "multiple records are bound to one webhook uuid; using the first"
            );
            matches.sort_by_key(|r| r.id);
        }

        Ok(matches.into_iter().next())
    }
}
