//! Shared-memory request/response transport between the coordinator and the
//! three out-of-process inference workers (ASR, LLM, TTS).
//!
//! Each worker gets two dedicated filesystem paths, `<service>_in` and
//! `<service>_out`. A call writes a request document to `_in`, then polls
//! `_out` until a response whose `id` matches the request shows up. At most
//! one request may be outstanding per service at a time — `Transport` holds
//! one lock per service to enforce that.

mod protocol;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub use protocol::{
    AsrTranscribeRequest, AsrTranscribeResponse, FunctionCallPayload, HealthResponse,
    LlmGenerateRequest, LlmGenerateResponse, TtsSynthesizeRequest, TtsSynthesizeResponse,
};

use crate::config::TransportConfig;
use crate::error::{BlackboxError, TransportErrorKind};

const SERVICES: [&str; 3] = ["asr", "llm", "tts"];

/// A call outstanding against one worker, for the lifetime of one `call`.
#[derive(Debug, Clone, Copy)]
struct PendingIpcCall {
    request_id: u64,
    issued_at: Instant,
    deadline: Duration,
}

/// Shared-memory transport to the ASR, LLM, and TTS workers.
pub struct Transport {
    config: TransportConfig,
    next_id: AtomicU64,
    locks: HashMap<&'static str, Mutex<()>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("shm_dir", &self.config.shm_dir)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a transport bound to `config`'s paths. Does not touch the
    /// filesystem; call [`Transport::initialize`] to create the files.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let locks = SERVICES.iter().map(|&s| (s, Mutex::new(()))).collect();
        Self {
            config,
            next_id: AtomicU64::new(1),
            locks,
        }
    }

    /// Create/truncate all six transport files and reset request ids to 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared-memory directory cannot be created or
    /// a transport file cannot be opened for writing.
    pub async fn initialize(&self) -> Result<(), BlackboxError> {
        let shm_dir = self.config.shm_dir.clone();
        let paths: Vec<PathBuf> = SERVICES
            .iter()
            .flat_map(|&s| [self.config.input_path(s), self.config.output_path(s)])
            .collect();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&shm_dir)?;
            for path in &paths {
                std::fs::write(path, b"")?;
            }
            Ok(())
        })
        .await
        .map_err(|e| BlackboxError::Protocol(e.to_string()))??;
        self.next_id.store(1, Ordering::SeqCst);
        tracing::info!(dir = %self.config.shm_dir.display(), "transport initialized");
        Ok(())
    }

    /// Best-effort removal of all six transport paths. Errors are logged,
    /// never propagated.
    pub async fn shutdown(&self) {
        for service in SERVICES {
            for path in [
                self.config.input_path(service),
                self.config.output_path(service),
            ] {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove transport file");
                    }
                }
            }
        }
    }

    /// Call `method` on `service` with `data`, waiting up to `deadline` for a
    /// correlated response.
    ///
    /// # Errors
    ///
    /// Returns [`BlackboxError::Timeout`] if `deadline` elapses,
    /// [`BlackboxError::Transport`] on a missing path or unresponsive worker,
    /// or [`BlackboxError::Worker`] if the worker itself reported an error.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        data: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, BlackboxError> {
        let lock = self.locks.get(service).ok_or_else(|| {
            BlackboxError::Protocol(format!("unknown transport service `{service}`"))
        })?;
        let _guard = lock.lock().await;

        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pending = PendingIpcCall {
            request_id,
            issued_at: Instant::now(),
            deadline,
        };

        let request = serde_json::json!({
            "id": request_id,
            "method": method,
            "data": data,
        });

        let input_path = self.config.input_path(service);
        let output_path = self.config.output_path(service);
        protocol::write_request(&input_path, &request)
            .await
            .map_err(|_| BlackboxError::Transport(TransportErrorKind::PathMissing))?;

        let poll_interval = Duration::from_millis(u64::from(self.config.poll_interval_ms));
        let outcome = tokio::time::timeout(
            deadline,
            protocol::poll_for_response(&output_path, pending.request_id, poll_interval),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error").and_then(|v| v.as_str()) {
                    return Err(BlackboxError::Worker {
                        service: service.to_owned(),
                        message: error.to_owned(),
                    });
                }
                Ok(response
                    .get("result")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null))
            }
            Ok(Err(_)) => Err(BlackboxError::Transport(TransportErrorKind::Unresponsive)),
            Err(_) => Err(BlackboxError::Timeout {
                stage: service.to_owned(),
                budget_secs: deadline.as_secs_f64(),
                elapsed_secs: pending.issued_at.elapsed().as_secs_f64(),
            }),
        }
    }

    /// Call `<service>`'s `health` method, treating any error as unhealthy.
    pub async fn health_check(&self, service: &str, deadline: Duration) -> bool {
        self.call(service, "health", serde_json::json!({}), deadline)
            .await
            .is_ok_and(|result| result.get("status").and_then(|v| v.as_str()) == Some("ok"))
    }

    /// ASR `transcribe`.
    ///
    /// # Errors
    ///
    /// See [`Transport::call`].
    pub async fn asr_transcribe(
        &self,
        request: &AsrTranscribeRequest,
        deadline: Duration,
    ) -> Result<AsrTranscribeResponse, BlackboxError> {
        let data = serde_json::to_value(request)
            .map_err(|e| BlackboxError::Protocol(e.to_string()))?;
        let result = self.call("asr", "transcribe", data, deadline).await?;
        serde_json::from_value(result).map_err(|e| BlackboxError::Protocol(e.to_string()))
    }

    /// LLM `generate`.
    ///
    /// # Errors
    ///
    /// See [`Transport::call`].
    pub async fn llm_generate(
        &self,
        request: &LlmGenerateRequest,
        deadline: Duration,
    ) -> Result<LlmGenerateResponse, BlackboxError> {
        let data = serde_json::to_value(request)
            .map_err(|e| BlackboxError::Protocol(e.to_string()))?;
        let result = self.call("llm", "generate", data, deadline).await?;
        serde_json::from_value(result).map_err(|e| BlackboxError::Protocol(e.to_string()))
    }

    /// TTS `synthesize`.
    ///
    /// # Errors
    ///
    /// See [`Transport::call`].
    pub async fn tts_synthesize(
        &self,
        request: &TtsSynthesizeRequest,
        deadline: Duration,
    ) -> Result<TtsSynthesizeResponse, BlackboxError> {
        let data = serde_json::to_value(request)
            .map_err(|e| BlackboxError::Protocol(e.to_string()))?;
        let result = self.call("tts", "synthesize", data, deadline).await?;
        serde_json::from_value(result).map_err(|e| BlackboxError::Protocol(e.to_string()))
    }
}
