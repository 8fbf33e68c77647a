//! Asynchronous speech-to-text providers.
//!
//! A provider accepts an audio URL plus a callback URL, answers with a
//! request id, and later POSTs its result to the callback URL. Providers
//! differ in what that callback carries: Deepgram sends the full result,
//! Soniox only announces that a transcript is ready to be fetched.

mod deepgram;
mod mock;
mod soniox;

pub use deepgram::DeepgramProvider;
pub use mock::{MockCallbackStyle, MockSttProvider};
pub use soniox::SonioxProvider;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transcript::extract_transcript;

/// What a provider's callback means for the waiting job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CallbackOutcome {
    /// The callback carried the transcript itself.
    Transcript {
        /// Extracted transcript text (empty if none was found)
        text: String,
        /// Full callback payload
        raw: Value,
    },

    /// The transcript is ready and must be fetched by id.
    Ready {
        /// Provider-side transcription id
        transcription_id: String,
    },

    /// The provider reported a failure.
    Failed {
        /// Reason reported by the provider
        message: String,
    },
}

/// An asynchronous speech-to-text provider.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Provider name as used in job input (`"deepgram"`, `"soniox"`).
    fn name(&self) -> &str;

    /// Submits `audio_url` for transcription; the provider will POST its
    /// result to `callback_url`. Returns the provider's request id.
    async fn submit(
        &self,
        audio_url: &str,
        callback_url: &str,
        options: Option<&Value>,
    ) -> Result<String>;

    /// Interprets a callback payload.
    ///
    /// The default treats the payload as a full result and extracts its
    /// transcript, never failing.
    fn interpret_callback(&self, payload: &Value) -> CallbackOutcome {
        CallbackOutcome::Transcript {
            text: extract_transcript(payload),
            raw: payload.clone(),
        }
    }

    /// Fetches a finished transcript by id, for providers whose callback
    /// only announces completion.
    async fn fetch_transcript(&self, _transcription_id: &str) -> Result<Value> {
        Err(Error::Unsupported {
            provider: self.name().to_string(),
            operation: "fetch_transcript",
        })
    }
}

/// Providers available to the workflow, by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn SttProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under its own name, replacing any previous one.
    pub fn with(mut self, provider: Arc<dyn SttProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Registers `provider` under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn SttProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Looks up a provider.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SttProvider>> {
        self.providers.get(name).cloned()
    }

    /// Returns whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Copies scalar entries of a JSON options object into `url`'s query.
pub(crate) fn append_query_options(url: &mut reqwest::Url, options: Option<&Value>) {
    let Some(Value::Object(map)) = options else {
        return;
    };
    let mut pairs = url.query_pairs_mut();
    for (key, value) in map {
        match value {
            Value::String(s) => {
                pairs.append_pair(key, s);
            }
            Value::Bool(_) | Value::Number(_) => {
                pairs.append_pair(key, &value.to_string());
            }
            _ => {}
        }
    }
}
