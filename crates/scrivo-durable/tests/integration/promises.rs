//! Durable promises awaited by workflows and settled by shared handlers.

use std::time::Duration;

use scrivo_core::InstanceKey;

use crate::common::{eventually, Awaiting, TestHarness};

#[tokio::test]
async fn test_workflow_resumes_when_promise_resolved() {
    let harness = TestHarness::new();
    let runtime = harness.runtime();
    let key = InstanceKey::new("job-1").unwrap();

    let handle = {
        let runtime = runtime.clone();
        let key = key.clone();
        tokio::spawn(async move { runtime.run_workflow(&Awaiting, &key, ()).await })
    };

    let shared = runtime.shared("Awaiting", "job-1").unwrap();
    assert!(
        eventually(|| async {
            shared.get::<String>("status").await.unwrap().as_deref() == Some("WAITING")
        })
        .await
    );

    let promise = shared.promise::<String>("result");
    assert!(promise.resolve(&"hello".to_string()).await.unwrap());
    assert!(!promise.resolve(&"again".to_string()).await.unwrap());

    let output = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(output, "hello");
}

#[tokio::test]
async fn test_rejected_promise_fails_workflow() {
    let harness = TestHarness::new();
    let runtime = harness.runtime();
    let key = InstanceKey::new("job-1").unwrap();

    runtime
        .shared("Awaiting", "job-1")
        .unwrap()
        .promise::<String>("result")
        .reject("no speech found")
        .await
        .unwrap();

    let err = runtime.run_workflow(&Awaiting, &key, ()).await.unwrap_err();
    assert!(err.is_terminal());
    assert_eq!(err.to_string(), "no speech found");

    let invocation = runtime.invocation("Awaiting", "job-1").await.unwrap().unwrap();
    assert!(!invocation.is_running());
}

#[tokio::test]
async fn test_resolution_from_other_runtime_is_observed() {
    let harness = TestHarness::new();
    let waiting_runtime = harness.runtime();
    let key = InstanceKey::new("job-2").unwrap();

    let handle = tokio::spawn(async move { waiting_runtime.run_workflow(&Awaiting, &key, ()).await });

    // A second runtime over the same store has its own wakeup registry, so
    // the awaiting side only learns of this through polling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness
        .runtime()
        .shared("Awaiting", "job-2")
        .unwrap()
        .promise::<String>("result")
        .resolve(&"from elsewhere".to_string())
        .await
        .unwrap();

    let output = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(output, "from elsewhere");
}
