//! Pipeline Coordinator: executes one voice or text interaction by composing
//! ASR, context retrieval, LLM, side-effect dispatch, context append, and TTS
//! under per-stage and total deadlines.

pub mod functions;
mod metrics;
mod timing;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use metrics::Metrics;
pub use timing::Timing;

use crate::config::{ContextConfig, DeadlineConfig};
use crate::error::{BlackboxError, PipelineError};
use crate::store::{ContextStore, TurnRole};
use crate::thermal::ThermalMonitor;
use crate::transport::{
    AsrTranscribeRequest, FunctionCallPayload, LlmGenerateRequest, Transport, TtsSynthesizeRequest,
};

const MAX_TOKENS: u32 = 512;

/// The outcome of a pipeline run, successful or partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub transcription: String,
    pub response_text: String,
    pub audio_data: Option<String>,
    pub function_calls: Vec<FunctionCallPayload>,
    pub timing: Timing,
    pub session_id: String,
}

/// Result of [`PipelineCoordinator::transcribe_only`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f64,
    pub timing: Timing,
}

/// Orchestrates the stage sequence. Owns a `Transport` handle and a
/// `ThermalMonitor` handle for the process lifetime; shares the
/// `ContextStore` handle with the rest of the application.
pub struct PipelineCoordinator {
    transport: Arc<Transport>,
    store: Arc<ContextStore>,
    thermal: Arc<ThermalMonitor>,
    deadlines: DeadlineConfig,
    context: ContextConfig,
    registry: functions::FunctionRegistry,
    metrics: Mutex<Metrics>,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator").finish_non_exhaustive()
    }
}

impl PipelineCoordinator {
    /// Compose the coordinator from its leaf dependencies.
    #[must_use]
    pub fn new(
        transport: Arc<Transport>,
        store: Arc<ContextStore>,
        thermal: Arc<ThermalMonitor>,
        deadlines: DeadlineConfig,
        context: ContextConfig,
    ) -> Self {
        let registry = functions::default_registry(Arc::clone(&store));
        Self {
            transport,
            store,
            thermal,
            deadlines,
            context,
            registry,
            metrics: Mutex::new(Metrics::new()),
        }
    }

    /// Full seven-stage pipeline: ASR, context fetch, LLM, side effects,
    /// context append, TTS, totals.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] carrying the failed stage name, its cause,
    /// and the timing collected up to the point of failure.
    pub async fn process_voice(
        &self,
        audio_bytes: &[u8],
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<PipelineResult, PipelineError> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut timing = Timing::new();
        let total_start = tokio::time::Instant::now();

        let throttled = self.thermal.should_throttle().await;
        if throttled {
            timing.set_flag("throttled");
            tracing::warn!(%session_id, "system in thermal throttle mode");
        }

        let audio_data = base64::engine::general_purpose::STANDARD.encode(audio_bytes);
        let asr_deadline = Duration::from_secs_f64(self.deadlines.asr_secs);
        let asr_start = tokio::time::Instant::now();
        let asr_result = self
            .transport
            .asr_transcribe(&AsrTranscribeRequest { audio_data }, asr_deadline)
            .await;
        timing.set("asr", asr_start.elapsed().as_secs_f64());
        let asr = match asr_result {
            Ok(asr) => asr,
            Err(e) => {
                timing.set("total", total_start.elapsed().as_secs_f64());
                return Err(self.fail("asr", e, timing.clone()));
            }
        };

        let result = self
            .run_from_transcription(&asr.text, user_id, &session_id, &mut timing, total_start)
            .await;
        result.map_err(|e| PipelineError {
            stage: e.0,
            source: e.1,
            timing: timing.clone(),
        })
    }

    /// Identical to [`PipelineCoordinator::process_voice`] but skips ASR; the
    /// returned `transcription` equals `text` verbatim.
    ///
    /// # Errors
    ///
    /// See [`PipelineCoordinator::process_voice`].
    pub async fn process_text(
        &self,
        text: &str,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<PipelineResult, PipelineError> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut timing = Timing::new();
        let total_start = tokio::time::Instant::now();

        if self.thermal.should_throttle().await {
            timing.set_flag("throttled");
            tracing::warn!(%session_id, "system in thermal throttle mode");
        }

        let result = self
            .run_from_transcription(text, user_id, &session_id, &mut timing, total_start)
            .await;
        result.map_err(|e| PipelineError {
            stage: e.0,
            source: e.1,
            timing: timing.clone(),
        })
    }

    /// ASR stage only; no context side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the ASR worker fails or times out.
    pub async fn transcribe_only(
        &self,
        audio_bytes: &[u8],
    ) -> Result<TranscriptionResult, BlackboxError> {
        let audio_data = base64::engine::general_purpose::STANDARD.encode(audio_bytes);
        let deadline = Duration::from_secs_f64(self.deadlines.asr_secs);
        let start = tokio::time::Instant::now();
        let response = self
            .transport
            .asr_transcribe(&AsrTranscribeRequest { audio_data }, deadline)
            .await?;
        let mut timing = Timing::new();
        timing.set("asr", start.elapsed().as_secs_f64());
        Ok(TranscriptionResult {
            text: response.text,
            confidence: response.confidence,
            timing,
        })
    }

    /// Steps 2–7: context fetch through totals. Shared by `process_voice`
    /// and `process_text` once a transcription is in hand.
    async fn run_from_transcription(
        &self,
        transcription: &str,
        user_id: &str,
        session_id: &str,
        timing: &mut Timing,
        total_start: tokio::time::Instant,
    ) -> Result<PipelineResult, (String, BlackboxError)> {
        let context = {
            let store = Arc::clone(&self.store);
            let user_id = user_id.to_owned();
            let limit = self.context.limit;
            let fetched = tokio::task::spawn_blocking(move || store.get_context(&user_id, limit))
                .await
                .map_err(|e| BlackboxError::Protocol(e.to_string()))
                .and_then(|r| r.map_err(BlackboxError::Store));
            match fetched {
                Ok(context) => context,
                Err(e) => {
                    timing.set("total", total_start.elapsed().as_secs_f64());
                    return Err(("context_fetch".to_owned(), e));
                }
            }
        };

        let prompt = build_prompt(&context, transcription, self.context.prompt_turns);
        let context_payload = context
            .iter()
            .map(|turn| {
                serde_json::json!({ "role": turn.role.as_str(), "content": turn.content })
            })
            .collect();

        let llm_deadline = Duration::from_secs_f64(self.deadlines.llm_secs);
        let llm_start = tokio::time::Instant::now();
        let llm_result = self
            .transport
            .llm_generate(
                &LlmGenerateRequest {
                    prompt,
                    context: context_payload,
                    max_tokens: MAX_TOKENS,
                    user_id: user_id.to_owned(),
                },
                llm_deadline,
            )
            .await;
        let llm_elapsed = llm_start.elapsed().as_secs_f64();
        timing.set("llm", llm_elapsed);
        let llm = match llm_result {
            Ok(llm) => llm,
            Err(e) => {
                timing.set("total", total_start.elapsed().as_secs_f64());
                return Err(("llm".to_owned(), e));
            }
        };
        if llm_elapsed > 0.0 && llm.tokens > 0 {
            timing.set(
                "llm_tokens_per_second",
                f64::from(llm.tokens) / llm_elapsed,
            );
        }

        if !llm.function_calls.is_empty() {
            let func_start = tokio::time::Instant::now();
            self.execute_function_calls(&llm.function_calls, user_id).await;
            timing.set("function_execution", func_start.elapsed().as_secs_f64());
        }

        let append_start = tokio::time::Instant::now();
        {
            let store = Arc::clone(&self.store);
            let user_id_owned = user_id.to_owned();
            let session_id_owned = session_id.to_owned();
            let user_turn = transcription.to_owned();
            let assistant_turn = llm.text.clone();
            let append_result = tokio::task::spawn_blocking(move || {
                store.append_turn(
                    &user_id_owned,
                    TurnRole::User,
                    &user_turn,
                    Some(&session_id_owned),
                )?;
                store.append_turn(
                    &user_id_owned,
                    TurnRole::Assistant,
                    &assistant_turn,
                    Some(&session_id_owned),
                )
            })
            .await;
            match append_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(%session_id, error = %e, "failed to append context turns"),
                Err(e) => tracing::warn!(%session_id, error = %e, "context append task panicked"),
            }
        }
        timing.set("context_update", append_start.elapsed().as_secs_f64());

        let tts_deadline = Duration::from_secs_f64(self.deadlines.tts_secs);
        let tts_start = tokio::time::Instant::now();
        let tts = self
            .transport
            .tts_synthesize(
                &TtsSynthesizeRequest {
                    text: llm.text.clone(),
                },
                tts_deadline,
            )
            .await;

        let total = total_start.elapsed().as_secs_f64();
        timing.set("total", total);

        match tts {
            Ok(tts) => {
                timing.set("tts", tts_start.elapsed().as_secs_f64());
                let asr = timing.get("asr").unwrap_or(0.0);
                let tts_elapsed = timing.get("tts").unwrap_or(0.0);
                timing.set(
                    "orchestration_overhead",
                    total - (asr + llm_elapsed + tts_elapsed),
                );
                self.metrics.lock().await.record_success(timing);
                Ok(PipelineResult {
                    success: true,
                    transcription: transcription.to_owned(),
                    response_text: llm.text,
                    audio_data: Some(tts.audio_data),
                    function_calls: llm.function_calls,
                    timing: timing.clone(),
                    session_id: session_id.to_owned(),
                })
            }
            Err(e) => {
                timing.set("tts", tts_start.elapsed().as_secs_f64());
                self.metrics.lock().await.record_failure();
                Err(("tts".to_owned(), e))
            }
        }
    }

    async fn execute_function_calls(&self, calls: &[FunctionCallPayload], user_id: &str) {
        for call in calls {
            match self.registry.get(&call.name) {
                Some(handler) => {
                    if let Err(e) = handler.call(user_id, &call.arguments).await {
                        tracing::error!(function = %call.name, error = %e, "function execution failed");
                    }
                }
                None => {
                    tracing::warn!(function = %call.name, "unknown function call, ignoring");
                }
            }
        }
    }

    fn fail(&self, stage: &str, source: BlackboxError, timing: Timing) -> PipelineError {
        PipelineError {
            stage: stage.to_owned(),
            source,
            timing,
        }
    }

    /// Snapshot of rolling pipeline metrics.
    pub async fn metrics_snapshot(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

/// Concatenate the last `prompt_turns` context turns (`role: content`, one
/// per line) with the current user prompt and the trailing `assistant: `
/// marker. No further templating.
fn build_prompt(
    context: &[crate::store::ConversationTurn],
    user_prompt: &str,
    prompt_turns: usize,
) -> String {
    let mut out = String::new();
    let start = context.len().saturating_sub(prompt_turns);
    for turn in &context[start..] {
        out.push_str(turn.role.as_str());
        out.push_str(": ");
        out.push_str(&turn.content);
        out.push('\n');
    }
    out.push_str(user_prompt);
    out.push_str("\nassistant: ");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SecurityConfig, ThermalConfig, TransportConfig};
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    /// Answers every request on `service` with a fixed `result` value, once.
    async fn respond_once(config: &TransportConfig, service: &str, result: serde_json::Value) {
        let input_path = config.input_path(service);
        let output_path = config.output_path(service);
        for _ in 0..400 {
            if let Ok(contents) = tokio::fs::read(&input_path).await {
                if !contents.is_empty() {
                    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&contents) {
                        let id = value["id"].clone();
                        tokio::fs::write(
                            &output_path,
                            serde_json::json!({ "id": id, "result": result }).to_string(),
                        )
                        .await
                        .expect("write fake worker response");
                        return;
                    }
                }
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("fake {service} worker never saw a request");
    }

    struct Harness {
        transport: Arc<Transport>,
        store: Arc<ContextStore>,
        thermal: Arc<ThermalMonitor>,
        transport_config: TransportConfig,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempdir().expect("tempdir");
        let transport_config = TransportConfig {
            shm_dir: dir.path().to_path_buf(),
            poll_interval_ms: 5,
        };
        let transport = Arc::new(Transport::new(transport_config.clone()));
        let store = Arc::new(ContextStore::open_in_memory(SecurityConfig::default()).expect("store"));
        let thermal = Arc::new(ThermalMonitor::new(ThermalConfig {
            warn_c: 75.0,
            critical_c: 85.0,
            cooldown_c: 70.0,
            poll_interval_secs: 2.0,
            history_capacity: 100,
        }));
        Harness {
            transport,
            store,
            thermal,
            transport_config,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn process_text_s1_style_round_trip() {
        let h = harness();
        h.transport.initialize().await.expect("init transport");

        let coordinator = PipelineCoordinator::new(
            Arc::clone(&h.transport),
            Arc::clone(&h.store),
            Arc::clone(&h.thermal),
            DeadlineConfig::default(),
            ContextConfig::default(),
        );

        let llm = respond_once(
            &h.transport_config,
            "llm",
            serde_json::json!({"text": "Hi.", "tokens": 1, "tokens_per_second": 10.0, "elapsed_seconds": 0.1, "function_calls": []}),
        );
        let tts = respond_once(
            &h.transport_config,
            "tts",
            serde_json::json!({"audio_data": "QUJD", "duration_seconds": 0.5, "elapsed_seconds": 0.1, "sample_rate": 22050, "realtime_factor": 5.0}),
        );
        let call = coordinator.process_text("hello", "default_user", None);
        let (result, _, _) = tokio::join!(call, llm, tts);
        let result = result.expect("pipeline succeeds");

        assert!(result.success);
        assert_eq!(result.transcription, "hello");
        assert_eq!(result.response_text, "Hi.");
        assert!(result.timing.get("llm").is_some());
        assert!(result.timing.get("tts").is_some());
        assert!(result.timing.get("total").is_some());
        assert!(result.timing.get("orchestration_overhead").is_some());

        let context = h.store.get_context("default_user", 10).expect("context");
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "hello");
        assert_eq!(context[1].content, "Hi.");
    }

    #[tokio::test]
    async fn process_text_s2_style_reminder_function_call() {
        let h = harness();
        h.transport.initialize().await.expect("init transport");

        let coordinator = PipelineCoordinator::new(
            Arc::clone(&h.transport),
            Arc::clone(&h.store),
            Arc::clone(&h.thermal),
            DeadlineConfig::default(),
            ContextConfig::default(),
        );

        let llm = respond_once(
            &h.transport_config,
            "llm",
            serde_json::json!({
                "text": "Sure, I'll remind you.",
                "tokens": 4,
                "tokens_per_second": 10.0,
                "elapsed_seconds": 0.2,
                "function_calls": [{
                    "name": "set_reminder",
                    "arguments": {"title": "milk", "due_date": "2030-01-01T00:00:00Z"}
                }]
            }),
        );
        let tts = respond_once(
            &h.transport_config,
            "tts",
            serde_json::json!({"audio_data": "QUJD", "duration_seconds": 0.5, "elapsed_seconds": 0.1, "sample_rate": 22050, "realtime_factor": 5.0}),
        );
        let call = coordinator.process_text("remind me to buy milk", "default_user", None);
        let (result, _, _) = tokio::join!(call, llm, tts);
        let result = result.expect("pipeline succeeds");

        assert!(result.timing.get("function_execution").is_some());
        let reminders = h.store.list_active_reminders("default_user").expect("reminders");
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].title, "milk");
    }

    #[tokio::test]
    async fn process_voice_s3_style_asr_timeout_fails_before_llm() {
        let h = harness();
        h.transport.initialize().await.expect("init transport");

        let mut deadlines = DeadlineConfig::default();
        deadlines.asr_secs = 0.05;
        let coordinator = PipelineCoordinator::new(
            Arc::clone(&h.transport),
            Arc::clone(&h.store),
            Arc::clone(&h.thermal),
            deadlines,
            ContextConfig::default(),
        );

        let result = coordinator.process_voice(b"audio bytes", "default_user", None).await;
        let err = result.expect_err("asr never responds");
        assert_eq!(err.stage, "asr");
        assert!(h.store.get_context("default_user", 10).expect("context").is_empty());

        let asr_elapsed = err.timing.get("asr").expect("asr elapsed recorded on failure");
        assert!((asr_elapsed - 0.05).abs() < 0.05, "asr ≈ 0.05s ± poll interval, got {asr_elapsed}");
        let total = err.timing.get("total").expect("total recorded on failure");
        assert!((total - asr_elapsed).abs() < 0.05, "total ≈ asr when failing at the asr stage");
    }
}
