//! Process-restart recovery over the file-backed store.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use scrivo_core::InstanceKey;
use scrivo_durable::{DurableRuntime, RedbStateStore};

use crate::common::TwoStep;

#[tokio::test]
async fn test_pending_instance_resumes_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.redb");
    let workflow = TwoStep::crashing();
    let key = InstanceKey::new("job-1").unwrap();

    {
        let runtime = DurableRuntime::new(Arc::new(RedbStateStore::open(&path).unwrap()));
        let _ = runtime
            .run_workflow(&workflow, &key, "in".to_string())
            .await;
    }

    let runtime = DurableRuntime::new(Arc::new(RedbStateStore::open(&path).unwrap()));
    let pending = runtime.pending("TwoStep").await.unwrap();
    assert_eq!(pending, vec![key.clone()]);

    let output = runtime.resume(&workflow, &key).await.unwrap();
    assert_eq!(output.as_deref(), Some("in-1-2"));
    assert_eq!(workflow.step_one_runs.load(Ordering::SeqCst), 1);
}
