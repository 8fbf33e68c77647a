//! Application state, wiring, and HTTP routes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use scrivo_core::{InstanceKey, StatusResponse};
use scrivo_durable::{DurableRuntime, InMemoryStateStore, RedbStateStore, StateStore};
use scrivo_gateway::{
    DeepgramProvider, InMemoryStorage, ProviderRegistry, SonioxProvider, StorageGateway,
    SupabaseStorage,
};
use scrivo_rate_limit::{
    AllowRequest, BucketState, Reservation, ReserveRequest, SetRateRequest, TokenBucket,
};
use scrivo_workflows::{
    CleanupReport, TranscriptionJob, TranscriptionOutput, TranscriptionService, sweep_older_than,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::{ScrivoConfig, SweepConfig};
use crate::error::{ApiError, Result};

/// Timeout applied to every outbound HTTP request.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Transcription jobs
    pub service: TranscriptionService,

    /// Audio bucket, for the cleanup sweep
    pub storage: Arc<dyn StorageGateway>,

    /// Token-bucket limiters, on the service's runtime
    pub buckets: TokenBucket,
}

impl AppState {
    /// Wraps an already wired service.
    pub fn new(service: TranscriptionService, storage: Arc<dyn StorageGateway>) -> Self {
        let buckets = TokenBucket::new(service.runtime().clone());
        Self {
            service,
            storage,
            buckets,
        }
    }

    /// Builds the state store, gateways, and service described by `config`.
    pub fn from_config(config: &ScrivoConfig) -> Result<Self> {
        let store: Arc<dyn StateStore> = match &config.state.path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Opening durable state");
                Arc::new(RedbStateStore::open(path)?)
            }
            None => {
                tracing::warn!("No state path configured, keeping durable state in memory");
                Arc::new(InMemoryStateStore::new())
            }
        };
        let runtime = DurableRuntime::builder().store(store).build();

        let client = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()
            .map_err(scrivo_gateway::Error::from)?;

        let storage: Arc<dyn StorageGateway> = if config.supabase.url.is_empty() {
            tracing::warn!("No Supabase URL configured, using an in-memory bucket");
            Arc::new(InMemoryStorage::new())
        } else {
            Arc::new(SupabaseStorage::new(client.clone(), config.supabase.clone())?)
        };

        let providers = build_providers(&client, config);
        if providers.names().is_empty() {
            tracing::warn!("No transcription provider has an API key; every job will fail");
        }
        tracing::info!(providers = ?providers.names(), "Registered transcription providers");

        let service = TranscriptionService::new(
            runtime,
            Arc::clone(&storage),
            providers,
            config.workflow.clone(),
        );
        Ok(Self::new(service, storage))
    }
}

fn build_providers(client: &reqwest::Client, config: &ScrivoConfig) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();

    if let Some(key) = config.deepgram.enabled_key() {
        let mut deepgram = DeepgramProvider::new(client.clone(), key);
        if let Some(url) = &config.deepgram.base_url {
            deepgram = deepgram.with_base_url(url);
        }
        if let Some(model) = &config.deepgram.model {
            deepgram = deepgram.with_model(model);
        }
        providers.register(Arc::new(deepgram));
    }

    if let Some(key) = config.soniox.enabled_key() {
        let mut soniox = SonioxProvider::new(client.clone(), key);
        if let Some(url) = &config.soniox.base_url {
            soniox = soniox.with_base_url(url);
        }
        if let Some(model) = &config.soniox.model {
            soniox = soniox.with_model(model);
        }
        providers.register(Arc::new(soniox));
    }

    providers
}

/// Builds the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/TranscriptionWorkflow/{key}/run", post(run_job))
        .route("/TranscriptionWorkflow/{key}/onResult", post(on_result))
        .route("/TranscriptionWorkflow/{key}/getStatus", get(get_status))
        .route("/TokenBucket/{key}/state", get(bucket_state))
        .route("/TokenBucket/{key}/tokens", get(bucket_tokens))
        .route("/TokenBucket/{key}/reserve", post(bucket_reserve))
        .route("/TokenBucket/{key}/setRate", post(bucket_set_rate))
        .route("/TokenBucket/{key}/cancelReservation", post(bucket_cancel))
        .route("/TokenBucket/{key}/allow", post(bucket_allow))
        .route("/TokenBucket/{key}/reset", post(bucket_reset))
        .route("/storage/cleanup", post(cleanup))
        .route("/health", get(health))
        .with_state(state)
}

/// Response to a job submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunAccepted {
    /// Instance key of the job
    pub id: String,
}

/// Response to a provider callback.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackAck {
    /// `false` when the job already had its result
    pub accepted: bool,
}

/// Body of a cleanup request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    /// Files older than this are deleted
    #[serde(default = "default_older_than_hours")]
    pub older_than_hours: u64,
}

fn default_older_than_hours() -> u64 {
    SweepConfig::default().older_than_hours
}

async fn run_job(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(job): Json<TranscriptionJob>,
) -> std::result::Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let key = InstanceKey::new(key)?;
    tracing::info!(
        key = %key,
        user_id = %job.user_id,
        provider = %job.provider,
        "Accepted transcription job"
    );

    let id = key.as_str().to_string();
    let handle = state.service.spawn(key, job);
    tokio::spawn(log_outcome(id.clone(), handle));

    Ok((StatusCode::ACCEPTED, Json(RunAccepted { id })))
}

async fn log_outcome(
    key: String,
    handle: JoinHandle<scrivo_core::Result<TranscriptionOutput>>,
) {
    match handle.await {
        Ok(Ok(_)) => tracing::info!(key = %key, "Transcription job finished"),
        Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "Transcription job failed"),
        Err(e) => tracing::error!(key = %key, error = %e, "Transcription task aborted"),
    }
}

async fn on_result(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<Value>,
) -> std::result::Result<Json<CallbackAck>, ApiError> {
    let accepted = state.service.on_result(&key, payload).await?;
    Ok(Json(CallbackAck { accepted }))
}

async fn get_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> std::result::Result<Json<StatusResponse>, ApiError> {
    Ok(Json(state.service.get_status(&key).await?))
}

async fn bucket_state(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> std::result::Result<Json<BucketState>, ApiError> {
    Ok(Json(state.buckets.state(&key).await?))
}

async fn bucket_tokens(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> std::result::Result<Json<f64>, ApiError> {
    Ok(Json(state.buckets.tokens(&key).await?))
}

async fn bucket_reserve(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<ReserveRequest>>,
) -> std::result::Result<Json<Reservation>, ApiError> {
    let request = body.map_or(
        ReserveRequest {
            n: 1,
            wait_limit_ms: 0,
        },
        |Json(r)| r,
    );
    let reservation = state
        .buckets
        .reserve(&key, request.n, request.wait_limit_ms)
        .await?;
    Ok(Json(reservation))
}

async fn bucket_set_rate(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SetRateRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .buckets
        .set_rate(&key, request.limit, request.burst)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bucket_cancel(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(reservation): Json<Reservation>,
) -> std::result::Result<StatusCode, ApiError> {
    state.buckets.cancel_reservation(&key, &reservation).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bucket_allow(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<AllowRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .buckets
        .allow(&key, request.n, request.limit, request.burst)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bucket_reset(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state.buckets.reset(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cleanup(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> std::result::Result<Json<CleanupReport>, ApiError> {
    let hours = body.map_or_else(default_older_than_hours, |Json(r)| r.older_than_hours);
    let report = run_sweep(state.storage.as_ref(), hours).await?;
    Ok(Json(report))
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Deletes uploads older than `older_than_hours`.
pub async fn run_sweep(
    storage: &dyn StorageGateway,
    older_than_hours: u64,
) -> scrivo_core::Result<CleanupReport> {
    let max_age = i64::try_from(older_than_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| {
            scrivo_core::Error::validation_field(
                "olderThanHours",
                format!("out of range: {older_than_hours}"),
            )
        })?;
    let report = sweep_older_than(storage, max_age, Utc::now()).await?;
    tracing::info!(
        deleted = report.deleted_count,
        failed = report.failed_count,
        scanned = report.total_scanned,
        "Storage sweep finished"
    );
    Ok(report)
}

/// Starts the periodic sweep, unless it is disabled.
pub fn spawn_sweeper(
    storage: Arc<dyn StorageGateway>,
    config: &SweepConfig,
) -> Option<JoinHandle<()>> {
    if config.interval_secs == 0 {
        tracing::info!("Periodic storage sweep disabled");
        return None;
    }
    let period = Duration::from_secs(config.interval_secs);
    let older_than_hours = config.older_than_hours;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; wait a full period first.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = run_sweep(storage.as_ref(), older_than_hours).await {
                tracing::warn!(error = %e, "Storage sweep failed");
            }
        }
    }))
}
