//! Restart recovery: interrupted jobs resume from their journal.

use std::sync::Arc;

use scrivo_core::PipelineStatus;
use scrivo_durable::{InMemoryStateStore, RedbStateStore, StateStore, Workflow};
use scrivo_gateway::ProviderRegistry;
use scrivo_workflows::TranscriptionWorkflow;
use serde_json::json;

use crate::common::{FlakyStore, TestHarness, eventually, key, wait_finished, wait_submitted};

#[tokio::test]
async fn test_interrupted_job_resumes_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scrivo.redb");

    let mut harness = TestHarness::new();
    harness.store = Arc::new(RedbStateStore::open(&path).unwrap());
    let service = harness.service();

    let handle = service.spawn(key("job-r"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-r").await;

    // Simulate a crash while the job waits for its callback.
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    drop(service);
    // Release the database handle before opening it again.
    harness.store = Arc::new(InMemoryStateStore::new());
    harness.store = Arc::new(RedbStateStore::open(&path).unwrap());

    let service = harness.service();
    let resumed = service.resume_pending().await.unwrap();
    assert_eq!(resumed, vec![key("job-r")]);

    service
        .on_result("job-r", json!({ "text": "after restart" }))
        .await
        .unwrap();
    let status = wait_finished(&service, "job-r").await;
    assert_eq!(status.status, PipelineStatus::Done);
    assert_eq!(status.transcript.as_deref(), Some("after restart"));

    // Signing and submission were memoized before the crash.
    assert_eq!(harness.storage.sign_calls(), 1);
    assert_eq!(harness.deepgram.submit_calls(), 1);
    assert_eq!(harness.storage.delete_calls(), 1);
}

#[tokio::test]
async fn test_finished_jobs_are_not_resumed() {
    let harness = TestHarness::new();
    let service = harness.service();

    let handle = service.spawn(key("job-a"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-a").await;
    service
        .on_result("job-a", json!({ "text": "done" }))
        .await
        .unwrap();
    handle.await.unwrap().unwrap();

    let _pending = service.spawn(key("job-b"), harness.job("u1", "f2"));
    wait_submitted(&service, "job-b").await;

    let restarted = harness.service();
    assert_eq!(restarted.resume_pending().await.unwrap(), vec![key("job-b")]);
}

#[tokio::test]
async fn test_job_survives_state_store_outage() {
    let flaky = Arc::new(FlakyStore::default());
    let store: Arc<dyn StateStore> = flaky.clone();
    let mut harness = TestHarness::new();
    harness.store = store;
    let service = harness.service();

    let handle = service.spawn(key("job-s"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-s").await;

    // Writes fail while the callback lands; the job hits the outage.
    flaky.set_failing(true);
    service
        .on_result("job-s", json!({ "text": "after the outage" }))
        .await
        .unwrap();
    let observed = Arc::clone(&flaky);
    eventually(move || {
        let observed = Arc::clone(&observed);
        async move { observed.failures() > 1 }
    })
    .await;
    flaky.set_failing(false);

    let output = handle.await.unwrap().unwrap();
    assert_eq!(output.transcript, "after the outage");

    let status = service.get_status("job-s").await.unwrap();
    assert_eq!(status.status, PipelineStatus::Done);
    assert_eq!(harness.storage.delete_calls(), 1);
    assert_eq!(harness.deepgram.submit_calls(), 1);
    assert!(
        service
            .runtime()
            .pending(TranscriptionWorkflow::NAME)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_resume_without_provider_records_error() {
    let harness = TestHarness::new();
    let service = harness.service();

    let handle = service.spawn(key("job-p"), harness.job("u1", "f1"));
    wait_submitted(&service, "job-p").await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    // Restarted without the provider the job was submitted to.
    let restarted = harness.service_with(ProviderRegistry::new());
    let err = restarted.resume(&key("job-p")).await.unwrap_err();
    assert_eq!(err.to_string(), "unsupported provider: deepgram");

    let status = restarted.get_status("job-p").await.unwrap();
    assert_eq!(status.status, PipelineStatus::Error);
    assert_eq!(status.error.as_deref(), Some("unsupported provider: deepgram"));
    assert_eq!(harness.storage.delete_calls(), 1);

    let invocation = restarted
        .runtime()
        .shared(TranscriptionWorkflow::NAME, "job-p")
        .unwrap()
        .invocation()
        .await
        .unwrap()
        .unwrap();
    assert!(!invocation.is_running());
}
