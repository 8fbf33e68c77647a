//! The transcription workflow and its handlers.
//!
//! One workflow instance per submitted job, keyed by the caller's
//! idempotency key. The body runs these steps, each memoized:
//!
//! 1. `check-rate-limit`: consume one unit of the user's budget
//! 2. `create-signed-url`: let the provider read the uploaded audio
//! 3. `submit-transcription`: hand the audio and a callback URL to the
//!    provider, retrying transient failures
//! 4. `callback-deadline`: fix the point after which the job gives up
//! 5. wait on the `transcription-result` promise, resolved by
//!    [`TranscriptionService::on_result`]
//! 6. `fetch-transcript`: only for providers whose callback carries an id
//! 7. `delete-audio-file`: always, whatever happened above

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use scrivo_core::{Error, InstanceKey, PipelineStatus, Result, StatusResponse};
use scrivo_durable::{DurableRuntime, SharedContext, Workflow, WorkflowContext};
use scrivo_gateway::{
    CallbackOutcome, ProviderRegistry, StorageGateway, SttProvider, extract_transcript,
};
use scrivo_rate_limit::{RateLimitPolicy, RateLimiter, WindowState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::WorkflowConfig;

/// Provider used when a job does not name one.
pub const DEFAULT_PROVIDER: &str = "deepgram";

/// Name of the promise the provider callback settles.
pub const RESULT_PROMISE: &str = "transcription-result";

/// Step names, as recorded in the instance journal.
pub mod steps {
    /// Rate-limit admission
    pub const CHECK_RATE_LIMIT: &str = "check-rate-limit";
    /// Signed audio URL
    pub const CREATE_SIGNED_URL: &str = "create-signed-url";
    /// Provider submission
    pub const SUBMIT_TRANSCRIPTION: &str = "submit-transcription";
    /// Callback deadline
    pub const CALLBACK_DEADLINE: &str = "callback-deadline";
    /// Transcript download for id-only callbacks
    pub const FETCH_TRANSCRIPT: &str = "fetch-transcript";
    /// Audio deletion
    pub const DELETE_AUDIO_FILE: &str = "delete-audio-file";
}

/// State fields of a transcription instance.
mod fields {
    pub const STATUS: &str = "status";
    pub const FILE_ID: &str = "fileId";
    pub const USER_ID: &str = "userId";
    pub const PROVIDER: &str = "provider";
    pub const PROVIDER_REQUEST_ID: &str = "providerRequestId";
    pub const RAW_RESULT: &str = "rawResult";
    pub const TRANSCRIPT: &str = "transcript";
    pub const ERROR: &str = "error";
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

/// A transcription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionJob {
    /// User the job is billed against (rate-limit key)
    pub user_id: String,

    /// Object path of the uploaded audio
    pub file_id: String,

    /// Provider name
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Provider-specific options passed through on submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<Value>,

    /// Rate limit overriding the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
}

impl TranscriptionJob {
    /// Creates a job for the default provider.
    pub fn new(user_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            file_id: file_id.into(),
            provider: default_provider(),
            provider_options: None,
            rate_limit: None,
        }
    }

    /// Uses `provider` instead of the default.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Passes `options` to the provider.
    pub fn with_provider_options(mut self, options: Value) -> Self {
        self.provider_options = Some(options);
        self
    }

    /// Applies `policy` instead of the configured rate limit.
    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }
}

/// Result of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionOutput {
    /// Always [`PipelineStatus::Done`]
    pub status: PipelineStatus,

    /// Provider that produced the transcript
    pub provider: String,

    /// Provider-side request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,

    /// Transcript text (empty if the payload carried none)
    pub transcript: String,

    /// Provider payload the transcript was taken from
    pub raw_result: Value,
}

/// The durable transcription job.
pub struct TranscriptionWorkflow {
    limiter: RateLimiter,
    storage: Arc<dyn StorageGateway>,
    providers: ProviderRegistry,
    config: WorkflowConfig,
}

impl std::fmt::Debug for TranscriptionWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionWorkflow")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TranscriptionWorkflow {
    /// Creates the workflow. The rate limiter shares `runtime`'s store.
    pub fn new(
        runtime: &DurableRuntime,
        storage: Arc<dyn StorageGateway>,
        providers: ProviderRegistry,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(runtime.clone()),
            storage,
            providers,
            config,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// URL the provider must POST its result to for instance `key`.
    pub fn callback_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}/onResult",
            self.config.public_url.trim_end_matches('/'),
            Self::NAME,
            urlencoding::encode(key)
        )
    }

    fn validate(&self, job: &TranscriptionJob) -> Result<Arc<dyn SttProvider>> {
        if job.file_id.is_empty() {
            return Err(Error::terminal("file_id cannot be empty"));
        }
        if job.user_id.is_empty() {
            return Err(Error::terminal("user_id cannot be empty"));
        }
        self.providers
            .get(&job.provider)
            .ok_or_else(|| Error::terminal(format!("unsupported provider: {}", job.provider)))
    }

    async fn transcribe(
        &self,
        ctx: &WorkflowContext,
        job: &TranscriptionJob,
    ) -> Result<TranscriptionOutput> {
        let provider = self.validate(job)?;

        ctx.set(fields::STATUS, &PipelineStatus::Queued).await?;
        ctx.set(fields::FILE_ID, &job.file_id).await?;
        ctx.set(fields::USER_ID, &job.user_id).await?;
        ctx.set(fields::PROVIDER, &job.provider).await?;

        let policy = job.rate_limit.unwrap_or(self.config.rate_limit);
        let usage: WindowState = ctx
            .run(steps::CHECK_RATE_LIMIT, || {
                self.limiter.check_and_consume(&job.user_id, policy)
            })
            .await?;
        tracing::debug!(
            user_id = %job.user_id,
            count = usage.count,
            max = policy.max_in_window,
            "Admitted by rate limiter"
        );

        ctx.set(fields::STATUS, &PipelineStatus::Transcribing).await?;

        let ttl = self.config.signed_url_ttl_secs;
        let audio_url: String = ctx
            .run(steps::CREATE_SIGNED_URL, || async {
                self.storage
                    .create_signed_url(&job.file_id, ttl)
                    .await
                    .map_err(|e| Error::terminal(format!("Failed to create signed URL: {e}")))
            })
            .await?;

        let callback_url = self.callback_url(ctx.key().as_str());
        let request_id: String = ctx
            .run_with_retry(steps::SUBMIT_TRANSCRIPTION, &self.config.retry, || async {
                provider
                    .submit(&audio_url, &callback_url, job.provider_options.as_ref())
                    .await
                    .map_err(Error::from)
            })
            .await?;
        ctx.set(fields::PROVIDER_REQUEST_ID, &request_id).await?;
        tracing::info!(key = %ctx.key(), request_id = %request_id, "Submitted to provider");

        let outcome = self.await_callback(ctx).await?;
        let (raw_result, transcript) = match outcome {
            CallbackOutcome::Transcript { text, raw } => (raw, text),
            CallbackOutcome::Ready { transcription_id } => {
                let raw: Value = ctx
                    .run_with_retry(steps::FETCH_TRANSCRIPT, &self.config.retry, || async {
                        provider
                            .fetch_transcript(&transcription_id)
                            .await
                            .map_err(Error::from)
                    })
                    .await?;
                let text = extract_transcript(&raw);
                (raw, text)
            }
            CallbackOutcome::Failed { message } => {
                return Err(Error::CallbackRejected { message });
            }
        };

        ctx.set(fields::RAW_RESULT, &raw_result).await?;
        ctx.set(fields::TRANSCRIPT, &transcript).await?;
        ctx.set(fields::STATUS, &PipelineStatus::Done).await?;

        Ok(TranscriptionOutput {
            status: PipelineStatus::Done,
            provider: job.provider.clone(),
            provider_request_id: Some(request_id),
            transcript,
            raw_result,
        })
    }

    async fn await_callback(&self, ctx: &WorkflowContext) -> Result<CallbackOutcome> {
        let promise = ctx.promise::<CallbackOutcome>(RESULT_PROMISE);

        let settled = match self.config.callback_timeout_secs {
            None => promise.result().await,
            Some(secs) => {
                let now = ctx.now_ms();
                let deadline: u64 = ctx
                    .run(steps::CALLBACK_DEADLINE, || async move {
                        Ok(now.saturating_add(secs.saturating_mul(1000)))
                    })
                    .await?;
                let remaining = Duration::from_millis(deadline.saturating_sub(ctx.now_ms()));
                match tokio::time::timeout(remaining, promise.result()).await {
                    Ok(settled) => settled,
                    // A callback may have landed just as the timer fired.
                    Err(_) => match promise.peek().await? {
                        Some(settled) => settled,
                        None => {
                            tracing::warn!(key = %ctx.key(), seconds = secs, "Provider callback timed out");
                            Err(Error::CallbackTimeout { seconds: secs })
                        }
                    },
                }
            }
        };

        // Rejections come back as terminal errors carrying the reason.
        settled.map_err(|err| match err {
            Error::Terminal { message, .. } => Error::CallbackRejected { message },
            other => other,
        })
    }

    async fn delete_audio(&self, ctx: &WorkflowContext, file_id: &str) {
        if file_id.is_empty() {
            return;
        }
        let deleted = ctx
            .run(steps::DELETE_AUDIO_FILE, || async {
                match self.storage.delete_file(file_id).await {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        tracing::error!(file_id, error = %e, "Failed to delete audio file");
                        Ok(false)
                    }
                }
            })
            .await;
        if let Err(e) = deleted {
            tracing::warn!(key = %ctx.key(), file_id, error = %e, "Cleanup step not recorded");
        }
    }
}

#[async_trait]
impl Workflow for TranscriptionWorkflow {
    const NAME: &'static str = "TranscriptionWorkflow";
    type Input = TranscriptionJob;
    type Output = TranscriptionOutput;

    async fn run(&self, ctx: &WorkflowContext, job: TranscriptionJob) -> Result<TranscriptionOutput> {
        tracing::info!(
            key = %ctx.key(),
            user_id = %job.user_id,
            file_id = %job.file_id,
            provider = %job.provider,
            "Transcription started"
        );

        let result = self.transcribe(ctx, &job).await;
        // The store is unavailable: leave the instance resumable and keep
        // the audio for the next attempt.
        if matches!(result, Err(Error::Storage { .. })) {
            return result;
        }
        match &result {
            Ok(output) => {
                tracing::info!(key = %ctx.key(), chars = output.transcript.len(), "Transcription done");
            }
            Err(err) => {
                tracing::error!(key = %ctx.key(), error = %err, "Transcription failed");
                ctx.set(fields::STATUS, &PipelineStatus::Error).await?;
                ctx.set(fields::ERROR, &err.to_string()).await?;
            }
        }

        self.delete_audio(ctx, &job.file_id).await;
        result
    }
}

/// Handlers for the transcription workflow: submission, provider callbacks,
/// status queries and restart recovery.
#[derive(Debug, Clone)]
pub struct TranscriptionService {
    runtime: DurableRuntime,
    workflow: Arc<TranscriptionWorkflow>,
}

impl TranscriptionService {
    /// Creates the service on `runtime`.
    pub fn new(
        runtime: DurableRuntime,
        storage: Arc<dyn StorageGateway>,
        providers: ProviderRegistry,
        config: WorkflowConfig,
    ) -> Self {
        let workflow = Arc::new(TranscriptionWorkflow::new(&runtime, storage, providers, config));
        Self { runtime, workflow }
    }

    /// The underlying runtime.
    pub fn runtime(&self) -> &DurableRuntime {
        &self.runtime
    }

    /// The workflow definition.
    pub fn workflow(&self) -> &TranscriptionWorkflow {
        &self.workflow
    }

    /// Runs instance `key` to completion.
    ///
    /// Safe to call again for the same key: a finished instance returns its
    /// recorded outcome and an interrupted one resumes with its original job.
    /// While the state store fails, the instance is re-driven on the
    /// `store_retry` schedule.
    pub async fn run(&self, key: &InstanceKey, job: TranscriptionJob) -> Result<TranscriptionOutput> {
        let workflow = self.workflow.as_ref();
        self.with_store_retry(key, || self.runtime.run_workflow(workflow, key, job.clone()))
            .await
    }

    /// Resumes instance `key` if it is still running, with the same store
    /// retries as [`run`](Self::run).
    pub async fn resume(&self, key: &InstanceKey) -> Result<Option<TranscriptionOutput>> {
        let workflow = self.workflow.as_ref();
        self.with_store_retry(key, || self.runtime.resume(workflow, key))
            .await
    }

    async fn with_store_retry<T, F, Fut>(&self, key: &InstanceKey, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        attempt
            .retry(self.workflow.config.store_retry.backoff())
            .when(|e: &Error| matches!(e, Error::Storage { .. }))
            .notify(|e: &Error, delay: Duration| {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "State store unavailable, retrying job"
                );
            })
            .await
    }

    /// Runs instance `key` in the background.
    pub fn spawn(
        &self,
        key: InstanceKey,
        job: TranscriptionJob,
    ) -> JoinHandle<Result<TranscriptionOutput>> {
        let service = self.clone();
        tokio::spawn(async move { service.run(&key, job).await })
    }

    fn instance(&self, key: &str) -> Result<SharedContext> {
        self.runtime.shared(TranscriptionWorkflow::NAME, key)
    }

    /// Handles a provider callback for instance `key`.
    ///
    /// Returns `false` when the job already has its result, in which case
    /// the payload is ignored. A failed transcription reported by the
    /// provider rejects the job's promise.
    pub async fn on_result(&self, key: &str, payload: Value) -> Result<bool> {
        let ctx = self.instance(key)?;
        if ctx.get::<String>(fields::TRANSCRIPT).await?.is_some() {
            tracing::debug!(key, "Transcript already stored, ignoring callback");
            return Ok(false);
        }
        let promise = ctx.promise::<CallbackOutcome>(RESULT_PROMISE);
        if promise.is_settled().await? {
            tracing::debug!(key, "Result already received, ignoring callback");
            return Ok(false);
        }

        let Some(provider_name) = ctx.get::<String>(fields::PROVIDER).await? else {
            return Err(Error::terminal(format!("no transcription job for key {key}")));
        };
        let provider = self.workflow.providers.get(&provider_name).ok_or_else(|| {
            Error::terminal(format!("unknown provider in callback: {provider_name}"))
        })?;

        let accepted = match provider.interpret_callback(&payload) {
            CallbackOutcome::Failed { message } => {
                tracing::warn!(key, provider = %provider_name, reason = %message, "Provider reported failure");
                promise.reject(message).await?
            }
            outcome => promise.resolve(&outcome).await?,
        };
        tracing::info!(key, provider = %provider_name, accepted, "Callback received");
        Ok(accepted)
    }

    /// Current status of instance `key`. An instance with no state yet is
    /// reported as queued.
    pub async fn get_status(&self, key: &str) -> Result<StatusResponse> {
        let ctx = self.instance(key)?;
        Ok(StatusResponse {
            status: ctx.get(fields::STATUS).await?.unwrap_or_default(),
            transcript: ctx.get(fields::TRANSCRIPT).await?,
            error: ctx.get(fields::ERROR).await?,
            provider: ctx.get(fields::PROVIDER).await?,
            provider_request_id: ctx.get(fields::PROVIDER_REQUEST_ID).await?,
        })
    }

    /// Restarts every instance that was interrupted before finishing.
    /// Returns the keys that were resumed; each runs in its own task.
    pub async fn resume_pending(&self) -> Result<Vec<InstanceKey>> {
        let pending = self.runtime.pending(TranscriptionWorkflow::NAME).await?;
        for key in &pending {
            let service = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                match service.resume(&key).await {
                    Ok(_) => tracing::debug!(key = %key, "Resumed instance finished"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Resumed instance failed"),
                }
            });
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Resuming interrupted transcriptions");
        }
        Ok(pending)
    }
}
