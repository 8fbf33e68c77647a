//! Soniox async transcription with webhook.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{CallbackOutcome, SttProvider};
use crate::error::{check_status, Error, Result};
use crate::transcript::extract_transcript;

/// Production API host.
pub const API_HOST: &str = "https://api.soniox.com";

const DEFAULT_MODEL: &str = "stt-async-preview";

#[derive(Debug, Deserialize)]
struct CreateTranscriptionResponse {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebhookPayload {
    id: String,
    status: String,
}

/// Soniox client. Soniox's webhook only carries `{id, status}`; the
/// transcript is fetched separately.
#[derive(Debug, Clone)]
pub struct SonioxProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl SonioxProvider {
    /// Creates a client for the production API.
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: API_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Points the client at another host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Uses `model` instead of the default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SttProvider for SonioxProvider {
    fn name(&self) -> &str {
        "soniox"
    }

    async fn submit(
        &self,
        audio_url: &str,
        callback_url: &str,
        options: Option<&Value>,
    ) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "audio_url": audio_url,
            "webhook_url": callback_url,
        });
        if let (Some(Value::Object(extra)), Value::Object(target)) = (options, &mut body) {
            for (key, value) in extra {
                target.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let response = self
            .client
            .post(self.endpoint("transcriptions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let created: CreateTranscriptionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::invalid(format!("failed to parse soniox response: {e}")))?;

        if created.id.is_empty() {
            return Err(Error::invalid("missing soniox transcription id"));
        }
        tracing::debug!(transcription_id = %created.id, "Submitted to Soniox");
        Ok(created.id)
    }

    /// A webhook without a transcription id has nothing to fetch. It
    /// completes the job with whatever text it carries, usually none.
    fn interpret_callback(&self, payload: &Value) -> CallbackOutcome {
        let hook: WebhookPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
        if hook.status == "error" {
            return CallbackOutcome::Failed {
                message: format!("Soniox transcription {} failed", hook.id),
            };
        }
        if hook.id.is_empty() {
            tracing::warn!("Soniox callback without a transcription id");
            return CallbackOutcome::Transcript {
                text: extract_transcript(payload),
                raw: payload.clone(),
            };
        }
        CallbackOutcome::Ready {
            transcription_id: hook.id,
        }
    }

    async fn fetch_transcript(&self, transcription_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.endpoint(&format!("transcriptions/{transcription_id}/transcript")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::invalid(format!("failed to parse transcript response: {e}")))
    }
}
