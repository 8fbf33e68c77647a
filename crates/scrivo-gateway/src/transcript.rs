//! Transcript extraction from provider payloads.

use serde_json::Value;

/// JSON pointers tried in order when looking for transcript text.
const TRANSCRIPT_POINTERS: [&str; 3] = [
    "/results/channels/0/alternatives/0/transcript",
    "/channel/alternatives/0/transcript",
    "/text",
];

/// Extracts the transcript text from a provider payload.
///
/// Accepts the pre-recorded shape (`results.channels[0]...`), the streaming
/// shape (`channel.alternatives[0]...`) and a flat `text` field. Anything
/// else yields an empty string, so a garbled payload still completes the job.
///
/// # Examples
///
/// ```
/// use scrivo_gateway::extract_transcript;
/// use serde_json::json;
///
/// let payload = json!({ "channel": { "alternatives": [{ "transcript": "hello" }] } });
/// assert_eq!(extract_transcript(&payload), "hello");
/// assert_eq!(extract_transcript(&json!({})), "");
/// ```
pub fn extract_transcript(payload: &Value) -> String {
    TRANSCRIPT_POINTERS
        .iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}
