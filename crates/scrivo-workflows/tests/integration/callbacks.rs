//! Provider callbacks and status queries.

use scrivo_core::PipelineStatus;
use serde_json::json;

use crate::common::{TestHarness, key, wait_finished, wait_submitted};

#[tokio::test]
async fn test_second_callback_is_ignored() {
    let harness = TestHarness::new();
    let service = harness.service();

    let handle = service.spawn(key("job-a"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-a").await;

    let first = service
        .on_result("job-a", json!({ "text": "first" }))
        .await
        .unwrap();
    let second = service
        .on_result("job-a", json!({ "text": "second" }))
        .await
        .unwrap();
    assert!(first);
    assert!(!second);

    assert_eq!(handle.await.unwrap().unwrap().transcript, "first");

    // Once the transcript is stored, later callbacks are still no-ops.
    assert!(!service
        .on_result("job-a", json!({ "text": "third" }))
        .await
        .unwrap());
    let status = service.get_status("job-a").await.unwrap();
    assert_eq!(status.transcript.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_concurrent_callbacks_resolve_once() {
    let harness = TestHarness::new();
    let service = harness.service();

    let handle = service.spawn(key("job-a"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-a").await;

    let mut callbacks = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        callbacks.push(tokio::spawn(async move {
            service
                .on_result("job-a", json!({ "text": format!("t{i}") }))
                .await
                .unwrap()
        }));
    }
    let mut accepted = 0;
    for callback in callbacks {
        if callback.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);

    let output = handle.await.unwrap().unwrap();
    assert!(output.transcript.starts_with('t'));
}

#[tokio::test]
async fn test_provider_error_callback_fails_job() {
    let harness = TestHarness::new();
    let service = harness.service();
    let job = harness.job("u1", "f1").with_provider("soniox");

    let handle = service.spawn(key("job-s"), job);
    wait_submitted(&service, "job-s").await;
    service
        .on_result("job-s", json!({ "id": "tx", "status": "error" }))
        .await
        .unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_terminal());

    let status = service.get_status("job-s").await.unwrap();
    assert_eq!(status.status, PipelineStatus::Error);
    assert_eq!(
        status.error.as_deref(),
        Some("provider rejected transcription: mock transcription failed")
    );
    assert_eq!(harness.soniox.fetch_calls(), 0);
    assert_eq!(harness.storage.delete_calls(), 1);
}

#[tokio::test]
async fn test_status_before_any_write_is_queued() {
    let harness = TestHarness::new();
    let service = harness.service();

    let status = service.get_status("not-started").await.unwrap();
    assert_eq!(status.status, PipelineStatus::Queued);
    assert!(status.transcript.is_none());
    assert!(status.error.is_none());
    assert!(status.provider.is_none());

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json, json!({ "status": "QUEUED" }));
}

#[tokio::test]
async fn test_status_visible_from_second_service() {
    let harness = TestHarness::new();
    let service = harness.service();
    let observer = harness.service();

    let _handle = service.spawn(key("job-a"), harness.job("u1", "f1"));
    wait_submitted(&observer, "job-a").await;

    // The callback may arrive at any process sharing the store.
    observer
        .on_result("job-a", json!({ "text": "shared" }))
        .await
        .unwrap();
    let status = wait_finished(&observer, "job-a").await;
    assert_eq!(status.status, PipelineStatus::Done);
    assert_eq!(status.transcript.as_deref(), Some("shared"));
}
