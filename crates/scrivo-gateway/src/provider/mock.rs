//! Mock provider for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{CallbackOutcome, SttProvider};
use crate::error::{Error, Result};
use crate::transcript::extract_transcript;

/// How the mock interprets callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockCallbackStyle {
    /// Callbacks carry the transcript (Deepgram-like).
    #[default]
    Transcript,

    /// Callbacks carry `{id, status}` and the transcript is fetched
    /// (Soniox-like).
    Ready,
}

/// Scripted provider that records what it was asked to do.
#[derive(Debug, Default)]
pub struct MockSttProvider {
    name: String,
    style: MockCallbackStyle,
    submit_failures: Mutex<VecDeque<Error>>,
    transcript: Mutex<Value>,
    submissions: Mutex<Vec<(String, String)>>,
    submit_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockSttProvider {
    /// Creates a Deepgram-style mock registered under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transcript: Mutex::new(json!({ "text": "" })),
            ..Self::default()
        }
    }

    /// Switches the callback style.
    pub fn with_style(mut self, style: MockCallbackStyle) -> Self {
        self.style = style;
        self
    }

    /// Payload returned by `fetch_transcript`.
    pub fn with_transcript(self, payload: Value) -> Self {
        *self.transcript.lock().unwrap_or_else(|e| e.into_inner()) = payload;
        self
    }

    /// Queues an error to be returned by the next `submit` call. Queued
    /// errors are consumed one per call.
    pub fn fail_submit(&self, error: Error) {
        self.submit_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Number of `submit` calls, failed ones included.
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_transcript` calls.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// `(audio_url, callback_url)` of each successful submission.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SttProvider for MockSttProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(
        &self,
        audio_url: &str,
        callback_url: &str,
        _options: Option<&Value>,
    ) -> Result<String> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self
            .submit_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(err);
        }
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((audio_url.to_string(), callback_url.to_string()));
        Ok(format!("{}-req-{n}", self.name))
    }

    fn interpret_callback(&self, payload: &Value) -> CallbackOutcome {
        match self.style {
            MockCallbackStyle::Transcript => CallbackOutcome::Transcript {
                text: extract_transcript(payload),
                raw: payload.clone(),
            },
            MockCallbackStyle::Ready => {
                match (
                    payload.get("id").and_then(Value::as_str),
                    payload.get("status").and_then(Value::as_str),
                ) {
                    (_, Some("error")) | (None, _) => CallbackOutcome::Failed {
                        message: "mock transcription failed".to_string(),
                    },
                    (Some(id), _) => CallbackOutcome::Ready {
                        transcription_id: id.to_string(),
                    },
                }
            }
        }
    }

    async fn fetch_transcript(&self, _transcription_id: &str) -> Result<Value> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}
