//! Replay of memoized steps and journaled writes.

use std::sync::atomic::Ordering;

use scrivo_core::InstanceKey;

use crate::common::{Diverging, Rejecting, TestHarness, TwoStep};

#[tokio::test]
async fn test_completed_steps_are_not_rerun_after_crash() {
    let harness = TestHarness::new();
    let workflow = TwoStep::crashing();
    let key = InstanceKey::new("job-1").unwrap();

    let err = harness
        .runtime()
        .run_workflow(&workflow, &key, "in".to_string())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let runtime = harness.runtime();
    assert_eq!(runtime.pending("TwoStep").await.unwrap(), vec![key.clone()]);

    let output = runtime.resume(&workflow, &key).await.unwrap();
    assert_eq!(output.as_deref(), Some("in-1-2"));
    assert_eq!(workflow.step_one_runs.load(Ordering::SeqCst), 1);
    assert_eq!(workflow.step_two_runs.load(Ordering::SeqCst), 1);
    assert!(runtime.pending("TwoStep").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_does_not_regress_during_replay() {
    let harness = TestHarness::new();
    let workflow = TwoStep::crashing();
    let key = InstanceKey::new("job-1").unwrap();
    let _ = harness
        .runtime()
        .run_workflow(&workflow, &key, "in".to_string())
        .await;

    harness.runtime().resume(&workflow, &key).await.unwrap();

    // Step two ran during the replay, after the replayed QUEUED write.
    let observed = workflow.observed_status.lock().unwrap().clone();
    assert_eq!(observed, vec!["WORKING".to_string()]);

    let status: Option<String> = harness
        .runtime()
        .shared("TwoStep", "job-1")
        .unwrap()
        .get("status")
        .await
        .unwrap();
    assert_eq!(status.as_deref(), Some("DONE"));
}

#[tokio::test]
async fn test_resume_uses_original_input() {
    let harness = TestHarness::new();
    let workflow = TwoStep::crashing();
    let key = InstanceKey::new("job-1").unwrap();
    let _ = harness
        .runtime()
        .run_workflow(&workflow, &key, "first".to_string())
        .await;

    let output = harness
        .runtime()
        .run_workflow(&workflow, &key, "second".to_string())
        .await
        .unwrap();
    assert_eq!(output, "first-1-2");
}

#[tokio::test]
async fn test_failed_step_replays_same_error_without_rerunning() {
    let harness = TestHarness::new();
    let workflow = Rejecting::default();
    workflow.crash_after_step.store(true, Ordering::SeqCst);
    let key = InstanceKey::new("job-1").unwrap();

    let err = harness
        .runtime()
        .run_workflow(&workflow, &key, ())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let err = harness.runtime().resume(&workflow, &key).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.to_string(), "rate limit exceeded");
    assert_eq!(workflow.step_runs.load(Ordering::SeqCst), 1);

    // Finished instances answer from their invocation record.
    let again = harness
        .runtime()
        .run_workflow(&workflow, &key, ())
        .await
        .unwrap_err();
    assert_eq!(again.code(), Some(429));
    assert_eq!(workflow.step_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_journal_records_step_order() {
    let harness = TestHarness::new();
    let workflow = TwoStep::default();
    let key = InstanceKey::new("job-1").unwrap();
    harness
        .runtime()
        .run_workflow(&workflow, &key, "x".to_string())
        .await
        .unwrap();

    let journal: scrivo_durable::Journal = serde_json::from_value(
        harness
            .store
            .get(
                &scrivo_durable::Scope::new("TwoStep", "job-1").unwrap(),
                "$journal",
            )
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(journal.steps, vec!["one".to_string(), "two".to_string()]);
    let written: Vec<_> = journal
        .writes
        .iter()
        .map(|w| (w.field.as_str(), w.value.clone()))
        .collect();
    assert_eq!(
        written,
        vec![
            ("status", Some(serde_json::json!("QUEUED"))),
            ("status", Some(serde_json::json!("WORKING"))),
            ("status", Some(serde_json::json!("DONE"))),
        ]
    );
}

#[tokio::test]
async fn test_diverging_replay_applies_new_writes() {
    let harness = TestHarness::new();
    let workflow = Diverging::default();
    workflow.crash.store(true, Ordering::SeqCst);
    let key = InstanceKey::new("job-1").unwrap();

    let err = harness
        .runtime()
        .run_workflow(&workflow, &key, ())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    // The resumed execution writes to the same positions with other values.
    workflow.fail_early.store(true, Ordering::SeqCst);
    let runtime = harness.runtime();
    let err = runtime.resume(&workflow, &key).await.unwrap_err();
    assert_eq!(err.to_string(), "config went away");

    let shared = runtime.shared("Diverging", "job-1").unwrap();
    let status: Option<String> = shared.get("status").await.unwrap();
    let error: Option<String> = shared.get("error").await.unwrap();
    assert_eq!(status.as_deref(), Some("ERROR"));
    assert_eq!(error.as_deref(), Some("config went away"));
    assert!(runtime.pending("Diverging").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_after_divergence_keeps_later_matches() {
    let harness = TestHarness::new();
    let workflow = Diverging::default();
    workflow.crash.store(true, Ordering::SeqCst);
    let key = InstanceKey::new("job-1").unwrap();
    let _ = harness.runtime().run_workflow(&workflow, &key, ()).await;

    // Same path again: both journaled writes are skipped, the new one lands.
    harness.runtime().resume(&workflow, &key).await.unwrap();

    let journal: scrivo_durable::Journal = serde_json::from_value(
        harness
            .store
            .get(
                &scrivo_durable::Scope::new("Diverging", "job-1").unwrap(),
                "$journal",
            )
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    let fields: Vec<_> = journal.writes.iter().map(|w| w.field.as_str()).collect();
    assert_eq!(fields, vec!["status", "provider", "status"]);
}

#[tokio::test]
async fn test_reserved_fields_are_rejected() {
    let runtime = TestHarness::new().runtime();
    let shared = runtime.shared("TwoStep", "job-1").unwrap();
    let err = shared.get::<String>("$invocation").await.unwrap_err();
    assert!(err.to_string().contains("reserved"));
}
