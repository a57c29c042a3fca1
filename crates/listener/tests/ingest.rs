//! HTTP round trip against a bound listener.

use std::sync::Arc;

use listener::{serve, ListenerState, ACKNOWLEDGEMENT, LISTENER_PATH};
use pretty_assertions::assert_eq;
use reconcile::{NotificationPayload, WorkQueue};
use storage::{MemoryQueue, StaticSettings};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test]
async fn webhook_calls_are_acknowledged_and_queued() {
    let queue = Arc::new(MemoryQueue::new());
    let state = ListenerState::new(queue.clone(), Arc::new(StaticSettings::with_token("t0ken")));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, state, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let url = format!("http://{addr}{LISTENER_PATH}");
    let payload = r#"{"uuid":"abc","event":"create","title":"Hello"}"#;

    let denied = client
        .post(&url)
        .header("Authorization", "wrong")
        .body(payload)
        .send()
        .await
        .expect("send");
    assert_eq!(denied.status(), reqwest::StatusCode::FORBIDDEN);

    let accepted = client
        .post(&url)
        .header("Authorization", "t0ken")
        .body(payload)
        .send()
        .await
        .expect("send");
    assert_eq!(accepted.status(), reqwest::StatusCode::OK);
    assert_eq!(accepted.text().await.expect("body"), ACKNOWLEDGEMENT);

    let health: serde_json::Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert_eq!(health, serde_json::json!({"status": "ok", "pending": 1}));

    let item = queue.claim().await.expect("claim").expect("queued item");
    assert_eq!(item.payload, NotificationPayload::from(payload));

    stop_tx.send(()).expect("server running");
    server.await.expect("join").expect("clean shutdown");
}
