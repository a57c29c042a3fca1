use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use reconcile::NotificationPayload;
use serde::{Deserialize, Serialize};

use crate::access::Authorized;
use crate::error::ApiError;
use crate::ListenerState;

/// Body returned to every accepted webhook call.
pub const ACKNOWLEDGEMENT: &str = "Notification received";

/// Queues the raw request body. The payload is not inspected here; decoding
/// happens in the worker.
#[tracing::instrument(level = "debug", skip_all, fields(payload_len = body.len()))]
pub async fn receive_notification(
    _auth: Authorized,
    State(state): State<ListenerState>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let id = state
        .queue
        .enqueue(NotificationPayload::new(body.to_vec()))
        .await
        .map_err(ApiError::Queue)?;
    tracing::debug!(item_id = %id, "webhook notification queued");
    Ok(ACKNOWLEDGEMENT)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthBody {
    pub status: String,
    pub pending: usize,
}

pub async fn health(State(state): State<ListenerState>) -> Result<Json<HealthBody>, ApiError> {
    let pending = state
        .queue
        .pending_count()
        .await
        .map_err(ApiError::Queue)?;
    Ok(Json(HealthBody {
        status: "ok".to_owned(),
        pending,
    }))
}
