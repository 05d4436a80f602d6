//! Wire types and raw file I/O for the shared-memory transport.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Write `request` to `path`: truncate, write, flush, fsync.
pub(super) async fn write_request(
    path: &Path,
    request: &serde_json::Value,
) -> std::io::Result<()> {
    let path = path.to_path_buf();
    let body = request.to_string();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?
}

/// Poll `path` until it holds a parseable JSON document whose `id` matches
/// `request_id`, then clear the file and return the document.
///
/// Unparseable contents (a worker mid-write) are treated as "not yet" and
/// retried; contents with a non-matching id are left untouched and polling
/// continues, per the per-service single-outstanding-request protocol.
pub(super) async fn poll_for_response(
    path: &Path,
    request_id: u64,
    poll_interval: Duration,
) -> std::io::Result<serde_json::Value> {
    loop {
        if let Ok(contents) = tokio::fs::read(path).await {
            if !contents.is_empty() {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&contents) {
                    if value.get("id").and_then(serde_json::Value::as_u64) == Some(request_id) {
                        let _ = tokio::fs::write(path, b"").await;
                        return Ok(value);
                    }
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// `{audio_data: base64}` for the ASR `transcribe` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrTranscribeRequest {
    pub audio_data: String,
}

/// ASR `transcribe` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrTranscribeResponse {
    pub text: String,
    pub confidence: f64,
    pub elapsed_seconds: f64,
    pub language: String,
}

/// LLM `generate` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmGenerateRequest {
    pub prompt: String,
    pub context: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub user_id: String,
}

/// A function call emitted by the LLM worker, trusted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallPayload {
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// LLM `generate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmGenerateResponse {
    pub text: String,
    pub tokens: u32,
    pub tokens_per_second: f64,
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub function_calls: Vec<FunctionCallPayload>,
}

/// TTS `synthesize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSynthesizeRequest {
    pub text: String,
}

/// TTS `synthesize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSynthesizeResponse {
    pub audio_data: String,
    pub duration_seconds: f64,
    pub elapsed_seconds: f64,
    pub sample_rate: u32,
    pub realtime_factor: f64,
}

/// Shared `health` response from any of the three workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
