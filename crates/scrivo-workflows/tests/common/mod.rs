//! Common test utilities and harness for transcription workflow tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scrivo_core::{Error, InstanceKey, PipelineStatus, Result, StatusResponse};
use scrivo_durable::{DurableRuntime, InMemoryStateStore, Mutation, RetryPolicy, Scope, StateStore};
use scrivo_gateway::{InMemoryStorage, MockCallbackStyle, MockSttProvider, ProviderRegistry};
use scrivo_workflows::{TranscriptionJob, TranscriptionService, WorkflowConfig};

/// Test harness wiring the transcription service to in-memory doubles.
///
/// The storage bucket is pre-populated with the files named in
/// [`TestHarness::job`]. Clones of the harness share the store and doubles,
/// which lets a test stand up a second service over the same state.
#[derive(Clone)]
pub struct TestHarness {
    /// Durable state shared by every service built from this harness
    pub store: Arc<dyn StateStore>,
    /// Audio bucket
    pub storage: Arc<InMemoryStorage>,
    /// Provider whose callback carries the transcript
    pub deepgram: Arc<MockSttProvider>,
    /// Provider whose callback carries an id to fetch
    pub soniox: Arc<MockSttProvider>,
    /// Workflow settings
    pub config: WorkflowConfig,
}

impl TestHarness {
    /// Creates a harness with fast retries and no callback timeout.
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStateStore::new()),
            storage: Arc::new(InMemoryStorage::new()),
            deepgram: Arc::new(MockSttProvider::new("deepgram")),
            soniox: Arc::new(
                MockSttProvider::new("soniox")
                    .with_style(MockCallbackStyle::Ready)
                    .with_transcript(serde_json::json!({ "id": "tx", "text": "fetched text" })),
            ),
            config: WorkflowConfig::default()
                .with_public_url("https://scrivo.test")
                .with_callback_timeout(None)
                .with_retry(RetryPolicy {
                    initial_delay_ms: 1,
                    factor: 1.0,
                    max_delay_ms: 5,
                    max_attempts: 3,
                })
                .with_store_retry(RetryPolicy {
                    initial_delay_ms: 5,
                    factor: 1.0,
                    max_delay_ms: 5,
                    max_attempts: 400,
                }),
        }
    }

    /// Replaces the workflow settings.
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds a service with its own runtime over the shared store.
    pub fn service(&self) -> TranscriptionService {
        let providers = ProviderRegistry::new()
            .with(self.deepgram.clone())
            .with(self.soniox.clone());
        self.service_with(providers)
    }

    /// Like [`TestHarness::service`], with a different provider set.
    pub fn service_with(&self, providers: ProviderRegistry) -> TranscriptionService {
        let runtime = DurableRuntime::builder()
            .store(Arc::clone(&self.store))
            .poll_interval(Duration::from_millis(10))
            .build();
        TranscriptionService::new(runtime, self.storage.clone(), providers, self.config.clone())
    }

    /// A job for `user` whose audio file exists in the bucket.
    pub fn job(&self, user: &str, file: &str) -> TranscriptionJob {
        self.storage.insert(file, None);
        TranscriptionJob::new(user, file)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// State store whose batch writes fail while `failing` is set.
///
/// Reads and promise settlement keep working, as when a disk fills up.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStateStore,
    failing: AtomicBool,
    failures: AtomicUsize,
}

impl FlakyStore {
    /// Starts or stops failing writes.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes rejected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, scope: &Scope, field: &str) -> Result<Option<serde_json::Value>> {
        self.inner.get(scope, field).await
    }

    async fn apply(&self, scope: &Scope, mutations: Vec<Mutation>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(Error::storage("disk hiccup"));
        }
        self.inner.apply(scope, mutations).await
    }

    async fn insert_if_absent(
        &self,
        scope: &Scope,
        field: &str,
        value: serde_json::Value,
    ) -> Result<bool> {
        self.inner.insert_if_absent(scope, field, value).await
    }

    async fn fields(&self, scope: &Scope) -> Result<Vec<String>> {
        self.inner.fields(scope).await
    }

    async fn keys(&self, service: &str) -> Result<Vec<String>> {
        self.inner.keys(service).await
    }

    async fn clear_scope(&self, scope: &Scope) -> Result<()> {
        self.inner.clear_scope(scope).await
    }
}

/// Parses an instance key.
pub fn key(s: &str) -> InstanceKey {
    InstanceKey::new(s).unwrap()
}

/// Polls `check` until it returns true, failing the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Waits until instance `key` has been submitted to its provider.
pub async fn wait_submitted(service: &TranscriptionService, key: &str) -> StatusResponse {
    let mut last = StatusResponse::default();
    for _ in 0..200 {
        last = service.get_status(key).await.unwrap();
        if last.provider_request_id.is_some() {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {key} never submitted, last status {:?}", last.status);
}

/// Waits until instance `key` reaches a terminal status.
pub async fn wait_finished(service: &TranscriptionService, key: &str) -> StatusResponse {
    for _ in 0..200 {
        let status = service.get_status(key).await.unwrap();
        if status.status == PipelineStatus::Done || status.status == PipelineStatus::Error {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {key} never finished");
}
