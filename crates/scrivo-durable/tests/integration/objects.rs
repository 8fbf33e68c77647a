//! Virtual objects: exclusive per-key handlers.

use crate::common::TestHarness;

#[tokio::test]
async fn test_concurrent_increments_are_serialized() {
    let runtime = TestHarness::new().runtime();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let runtime = runtime.clone();
        handles.push(tokio::spawn(async move {
            let ctx = runtime.object("Counter", "c1").await.unwrap();
            let current: u64 = ctx.get("count").await.unwrap().unwrap_or(0);
            tokio::task::yield_now().await;
            ctx.set("count", &(current + 1)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let ctx = runtime.object("Counter", "c1").await.unwrap();
    assert_eq!(ctx.get::<u64>("count").await.unwrap(), Some(50));
}

#[tokio::test]
async fn test_clear_all_removes_object_state() {
    let runtime = TestHarness::new().runtime();
    let ctx = runtime.object("Counter", "c1").await.unwrap();
    ctx.set("count", &3u64).await.unwrap();
    ctx.set("label", "x").await.unwrap();
    ctx.clear_all().await.unwrap();
    assert_eq!(ctx.get::<u64>("count").await.unwrap(), None);
    assert!(runtime.store().keys("Counter").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_objects_with_different_keys_are_independent() {
    let runtime = TestHarness::new().runtime();
    let a = runtime.object("Counter", "a").await.unwrap();
    let b = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        runtime.object("Counter", "b"),
    )
    .await
    .unwrap()
    .unwrap();
    a.set("count", &1u64).await.unwrap();
    b.set("count", &2u64).await.unwrap();
    assert_eq!(a.get::<u64>("count").await.unwrap(), Some(1));
    assert_eq!(b.get::<u64>("count").await.unwrap(), Some(2));
}
