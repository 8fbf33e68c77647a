//! Deepgram pre-recorded transcription with callback.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{append_query_options, SttProvider};
use crate::error::{check_status, Error, Result};

/// Production API host.
pub const API_HOST: &str = "https://api.deepgram.com";

const DEFAULT_MODEL: &str = "nova-3";

#[derive(Debug, Deserialize)]
struct ListenResponse {
    request_id: String,
}

/// Deepgram client. Deepgram POSTs the full result to the callback URL.
#[derive(Debug, Clone)]
pub struct DeepgramProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl DeepgramProvider {
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
}

#[async_trait]
impl SttProvider for DeepgramProvider {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn submit(
        &self,
        audio_url: &str,
        callback_url: &str,
        options: Option<&Value>,
    ) -> Result<String> {
        let mut url = reqwest::Url::parse(&format!(
            "{}/v1/listen",
            self.base_url.trim_end_matches('/')
        ))
        .map_err(|e| Error::Config(format!("invalid deepgram base url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("callback", callback_url)
            .append_pair("model", &self.model);
        append_query_options(&mut url, options);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&json!({ "url": audio_url }))
            .send()
            .await?;
        let body: ListenResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::invalid(format!("failed to parse deepgram response: {e}")))?;

        if body.request_id.is_empty() {
            return Err(Error::invalid("missing deepgram request id"));
        }
        tracing::debug!(request_id = %body.request_id, "Submitted to Deepgram");
        Ok(body.request_id)
    }
}
