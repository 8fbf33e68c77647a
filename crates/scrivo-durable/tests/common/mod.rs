//! Common test utilities and workflows for durable runtime tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scrivo_core::{Error, Result};
use scrivo_durable::{DurableRuntime, InMemoryStateStore, StateStore, Workflow, WorkflowContext};

/// Test harness for integration tests.
pub struct TestHarness {
    /// Store shared by every runtime the harness creates
    pub store: Arc<dyn StateStore>,
}

impl TestHarness {
    /// Creates a harness over an in-memory store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStateStore::new()),
        }
    }

    /// A fresh runtime over the shared store, as after a process restart.
    pub fn runtime(&self) -> DurableRuntime {
        DurableRuntime::builder()
            .store(Arc::clone(&self.store))
            .poll_interval(Duration::from_millis(10))
            .build()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-step workflow that can be made to crash between its steps.
///
/// The "crash" is a store error returned after step one, which leaves the
/// instance resumable.
#[derive(Default)]
pub struct TwoStep {
    pub step_one_runs: AtomicUsize,
    pub step_two_runs: AtomicUsize,
    pub crash_after_one: AtomicBool,
    pub observed_status: Mutex<Vec<String>>,
}

impl TwoStep {
    pub fn crashing() -> Self {
        let workflow = Self::default();
        workflow.crash_after_one.store(true, Ordering::SeqCst);
        workflow
    }
}

#[async_trait]
impl Workflow for TwoStep {
    const NAME: &'static str = "TwoStep";
    type Input = String;
    type Output = String;

    async fn run(&self, ctx: &WorkflowContext, input: String) -> Result<String> {
        ctx.set("status", "QUEUED").await?;

        let one: String = ctx
            .run("one", || async {
                self.step_one_runs.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{input}-1"))
            })
            .await?;

        ctx.set("status", "WORKING").await?;

        if self.crash_after_one.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("simulated crash"));
        }

        let two: String = ctx
            .run("two", || async {
                self.step_two_runs.fetch_add(1, Ordering::SeqCst);
                let status: Option<String> = ctx.get("status").await?;
                self.observed_status
                    .lock()
                    .unwrap()
                    .push(status.unwrap_or_default());
                Ok(format!("{one}-2"))
            })
            .await?;

        ctx.set("status", "DONE").await?;
        Ok(two)
    }
}

/// Workflow whose single step fails with a terminal, coded error.
#[derive(Default)]
pub struct Rejecting {
    pub step_runs: AtomicUsize,
    pub crash_after_step: AtomicBool,
}

#[async_trait]
impl Workflow for Rejecting {
    const NAME: &'static str = "Rejecting";
    type Input = ();
    type Output = ();

    async fn run(&self, ctx: &WorkflowContext, _input: ()) -> Result<()> {
        let outcome: Result<()> = ctx
            .run("limited", || async {
                self.step_runs.fetch_add(1, Ordering::SeqCst);
                Err(Error::rate_limited())
            })
            .await;

        if self.crash_after_step.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("simulated crash"));
        }
        outcome
    }
}

/// Workflow whose second execution takes a different path than its first.
///
/// The first execution records a status and then crashes. With `fail_early`
/// set, the next execution reports a failure before doing anything else.
#[derive(Default)]
pub struct Diverging {
    pub crash: AtomicBool,
    pub fail_early: AtomicBool,
}

#[async_trait]
impl Workflow for Diverging {
    const NAME: &'static str = "Diverging";
    type Input = ();
    type Output = ();

    async fn run(&self, ctx: &WorkflowContext, _input: ()) -> Result<()> {
        if self.fail_early.load(Ordering::SeqCst) {
            ctx.set("status", "ERROR").await?;
            ctx.set("error", "config went away").await?;
            return Err(Error::terminal("config went away"));
        }

        ctx.set("status", "QUEUED").await?;
        ctx.set("provider", "deepgram").await?;
        if self.crash.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("simulated crash"));
        }
        ctx.set("status", "DONE").await?;
        Ok(())
    }
}

/// Workflow that waits for an external value on promise "result".
#[derive(Default)]
pub struct Awaiting;

#[async_trait]
impl Workflow for Awaiting {
    const NAME: &'static str = "Awaiting";
    type Input = ();
    type Output = String;

    async fn run(&self, ctx: &WorkflowContext, _input: ()) -> Result<String> {
        ctx.set("status", "WAITING").await?;
        let value: String = ctx.promise("result").result().await?;
        ctx.set("status", "DONE").await?;
        Ok(value)
    }
}

/// Waits until `f` returns true or one second passes.
pub async fn eventually<F, Fut>(mut f: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if f().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
