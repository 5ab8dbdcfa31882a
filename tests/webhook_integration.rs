//! Integration tests for webhook delivery.
//!
//! Each test spins up an Axum server on a random port that records every
//! request body and answers with a fixed status code.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use noncer::announcements::Announcement;
use noncer::error::DeliveryError;
use noncer::handoff;
use noncer::webhook::{WebhookSink, spawn_sink};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Hook {
    received: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    status: StatusCode,
}

async fn record(State(hook): State<Hook>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    hook.received.lock().unwrap().push((content_type, json));
    (hook.status, "hook says no".to_string())
}

/// Start a webhook server on a random port, return (url, hook state).
async fn start_hook(status: StatusCode) -> (String, Hook) {
    let hook = Hook {
        received: Arc::new(Mutex::new(Vec::new())),
        status,
    };
    let app = Router::new()
        .route("/hook", post(record))
        .with_state(hook.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://127.0.0.1:{port}/hook"), hook)
}

fn contents(hook: &Hook) -> Vec<String> {
    hook.received
        .lock()
        .unwrap()
        .iter()
        .map(|(_, json)| json["content"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn deliver_posts_json_content() {
    let (url, hook) = start_hook(StatusCode::NO_CONTENT).await;
    let sink = WebhookSink::new(url);

    timeout(TEST_TIMEOUT, sink.deliver("**Hi**\n\nbody"))
        .await
        .unwrap()
        .unwrap();

    let received = hook.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.as_deref(), Some("application/json"));
    assert_eq!(received[0].1, serde_json::json!({ "content": "**Hi**\n\nbody" }));
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (url, _hook) = start_hook(StatusCode::BAD_REQUEST).await;
    let sink = WebhookSink::new(url);

    let err = timeout(TEST_TIMEOUT, sink.deliver("hello"))
        .await
        .unwrap()
        .unwrap_err();

    match err {
        DeliveryError::Status { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "hook says no");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_part_does_not_stop_the_rest() {
    let (url, hook) = start_hook(StatusCode::INTERNAL_SERVER_ERROR).await;
    let sink = WebhookSink::new(url);
    let announcement = Announcement {
        subject: "News".into(),
        segments: vec!["one.".into(), "two.".into()],
    };

    let failed = timeout(TEST_TIMEOUT, sink.deliver_announcement(&announcement))
        .await
        .unwrap();

    assert_eq!(failed, 2);
    assert_eq!(contents(&hook), vec!["**News**\n\none.", "two."]);
}

#[tokio::test]
async fn sink_task_delivers_each_segment_in_order() {
    let (url, hook) = start_hook(StatusCode::OK).await;
    let (tx, rx) = handoff::channel();
    let handle = spawn_sink(WebhookSink::new(url), rx, CancellationToken::new());

    tx.send(Announcement::build("test", "0.1.2.3.4.5.6.7.8.9", 10))
        .await
        .unwrap();
    tx.send(Announcement::build("second", "Short.", 100))
        .await
        .unwrap();
    drop(tx);

    timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
    assert_eq!(
        contents(&hook),
        vec!["**test**\n\n0.1.2.", "3.4.5.6.7.", "8.9", "**second**\n\nShort."]
    );
}

#[tokio::test]
async fn bodyless_announcement_sends_subject_once() {
    let (url, hook) = start_hook(StatusCode::OK).await;
    let (tx, rx) = handoff::channel();
    let handle = spawn_sink(WebhookSink::new(url), rx, CancellationToken::new());

    // signature only: nothing left after cleaning
    let announcement = Announcement::build("Reminder", "\\-\\- \nOffice", 100);
    assert!(announcement.segments.is_empty());
    tx.send(announcement).await.unwrap();
    drop(tx);

    timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
    assert_eq!(contents(&hook), vec!["**Reminder**"]);
}

#[tokio::test]
async fn sink_task_stops_on_cancel() {
    let (url, hook) = start_hook(StatusCode::OK).await;
    let (tx, rx) = handoff::channel();
    let cancel = CancellationToken::new();
    let handle = spawn_sink(WebhookSink::new(url), rx, cancel.clone());

    cancel.cancel();
    timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();

    let sent = tx.send(Announcement::build("late", "Too late.", 100)).await;
    assert!(sent.is_err());
    assert!(contents(&hook).is_empty());
}
