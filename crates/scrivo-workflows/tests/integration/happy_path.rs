//! Jobs that reach DONE.

use scrivo_core::PipelineStatus;
use serde_json::json;

use crate::common::{TestHarness, key, wait_submitted};

#[tokio::test]
async fn test_channel_shaped_callback_completes_job() {
    let harness = TestHarness::new();
    let service = harness.service();
    let job = harness.job("u1", "f1");

    let handle = service.spawn(key("job-a"), job);
    let status = wait_submitted(&service, "job-a").await;
    assert_eq!(status.status, PipelineStatus::Transcribing);
    assert_eq!(status.provider.as_deref(), Some("deepgram"));
    assert_eq!(status.provider_request_id.as_deref(), Some("deepgram-req-1"));

    let accepted = service
        .on_result(
            "job-a",
            json!({ "channel": { "alternatives": [{ "transcript": "hello" }] } }),
        )
        .await
        .unwrap();
    assert!(accepted);

    let output = handle.await.unwrap().unwrap();
    assert_eq!(output.transcript, "hello");
    assert_eq!(output.status, PipelineStatus::Done);

    let status = service.get_status("job-a").await.unwrap();
    assert_eq!(status.status, PipelineStatus::Done);
    assert_eq!(status.transcript.as_deref(), Some("hello"));
    assert!(status.error.is_none());

    assert_eq!(harness.storage.deleted(), vec!["f1".to_string()]);
}

#[tokio::test]
async fn test_callback_url_names_the_instance() {
    let harness = TestHarness::new();
    let service = harness.service();

    let _handle = service.spawn(key("job 7"), harness.job("u1", "f1"));
    wait_submitted(&service, "job 7").await;

    let submissions = harness.deepgram.submissions();
    assert_eq!(submissions.len(), 1);
    let (audio_url, callback_url) = &submissions[0];
    assert_eq!(audio_url, "memory://f1?expiresIn=3600");
    assert_eq!(
        callback_url,
        "https://scrivo.test/TranscriptionWorkflow/job%207/onResult"
    );
}

#[tokio::test]
async fn test_rerun_of_done_instance_repeats_nothing() {
    let harness = TestHarness::new();
    let service = harness.service();
    let job = harness.job("u1", "f1");

    let handle = service.spawn(key("job-a"), job.clone());
    wait_submitted(&service, "job-a").await;
    service
        .on_result(
            "job-a",
            json!({ "results": { "channels": [{ "alternatives": [{ "transcript": "once" }] }] } }),
        )
        .await
        .unwrap();
    let first = handle.await.unwrap().unwrap();

    let second = service.run(&key("job-a"), job).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.transcript, "once");

    assert_eq!(harness.storage.sign_calls(), 1);
    assert_eq!(harness.deepgram.submit_calls(), 1);
    assert_eq!(harness.storage.delete_calls(), 1);
}

#[tokio::test]
async fn test_empty_callback_completes_with_empty_transcript() {
    let harness = TestHarness::new();
    let service = harness.service();

    let handle = service.spawn(key("job-c"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-c").await;
    service.on_result("job-c", json!({})).await.unwrap();

    let output = handle.await.unwrap().unwrap();
    assert_eq!(output.transcript, "");

    let status = service.get_status("job-c").await.unwrap();
    assert_eq!(status.status, PipelineStatus::Done);
    assert_eq!(status.transcript.as_deref(), Some(""));
}

#[tokio::test]
async fn test_ready_callback_fetches_transcript() {
    let harness = TestHarness::new();
    let service = harness.service();
    let job = harness.job("u1", "f1").with_provider("soniox");

    let handle = service.spawn(key("job-s"), job);
    let status = wait_submitted(&service, "job-s").await;
    assert_eq!(status.provider.as_deref(), Some("soniox"));

    service
        .on_result("job-s", json!({ "id": "tx", "status": "completed" }))
        .await
        .unwrap();

    let output = handle.await.unwrap().unwrap();
    assert_eq!(output.transcript, "fetched text");
    assert_eq!(output.raw_result["id"], "tx");
    assert_eq!(harness.soniox.fetch_calls(), 1);
    assert_eq!(harness.deepgram.submit_calls(), 0);
}

#[tokio::test]
async fn test_second_runner_gets_recorded_outcome() {
    let harness = TestHarness::new();
    let service = harness.service();
    let job = harness.job("u1", "f1");

    let handle = service.spawn(key("job-early"), job.clone());
    wait_submitted(&service, "job-early").await;
    service
        .on_result("job-early", json!({ "text": "early" }))
        .await
        .unwrap();
    // A second runner for the same key waits for the first and returns
    // its recorded outcome.
    let again = service.run(&key("job-early"), job).await.unwrap();
    let first = handle.await.unwrap().unwrap();
    assert_eq!(first.transcript, "early");
    assert_eq!(again, first);
}
