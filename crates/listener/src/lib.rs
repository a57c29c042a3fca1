//! Webhook ingest endpoint.
//!
//! Authenticates inbound webhook calls and hands each raw body to the
//! [`reconcile::WorkQueue`] unchanged. Nothing is decoded or validated here;
//! callers get the same acknowledgement whatever later happens to their
//! notification.
//!
//! | Route | Behaviour |
//! |-------|-----------|
//! | `POST /webhook-entities/listener` | `200 Notification received`, `403` on a bad token, `503` if the queue refuses the item |
//! | `GET /health` | `200 {"status":"ok","pending":n}` |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport only. The queue and the settings store
//! are injected through [`ListenerState`].

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use reconcile::{SettingsStore, WorkQueue};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub mod access;
pub mod error;
pub mod routes;

pub use access::Authorized;
pub use error::{ApiError, ErrorBody};
pub use routes::{HealthBody, ACKNOWLEDGEMENT};

/// Path the webhook provider posts notifications to.
pub const LISTENER_PATH: &str = "/webhook-entities/listener";

/// Shared state for every request handler.
#[derive(Clone)]
pub struct ListenerState {
    pub queue: Arc<dyn WorkQueue>,
    pub settings: Arc<dyn SettingsStore>,
}

impl ListenerState {
    pub fn new(queue: Arc<dyn WorkQueue>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { queue, settings }
    }
}

/// Builds the listener router with request tracing.
///
/// Request bodies are unbounded: every authenticated payload is queued as
/// received, whatever its size.
pub fn router(state: ListenerState) -> Router {
    Router::new()
        .route(
            LISTENER_PATH,
            post(routes::receive_notification).layer(DefaultBodyLimit::disable()),
        )
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the listener on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve<F>(listener: TcpListener, state: ListenerState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, path = LISTENER_PATH, "webhook listener bound");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
