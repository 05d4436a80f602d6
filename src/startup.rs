//! Startup readiness: wait for the three out-of-process workers to answer
//! `health` before the coordinator starts accepting requests.
//!
//! The workers are started and supervised outside this crate (see spec.md
//! §1's "out of scope" list); this module only confirms they're listening
//! on their transport paths before [`crate::app::AppContext::build`] hands
//! the coordinator to callers.

use std::time::Duration;

use crate::error::{BlackboxError, Result};
use crate::transport::Transport;

const SERVICES: [&str; 3] = ["asr", "llm", "tts"];

/// Poll each worker's `health` method until it answers `{"status":"ok"}` or
/// `attempts` is exhausted, logging progress the way the teacher's model
/// downloader reports phase completion.
///
/// # Errors
///
/// Returns [`BlackboxError::Timeout`] naming the first worker that never
/// became healthy within `attempts * retry_interval`.
pub async fn wait_for_workers(
    transport: &Transport,
    attempts: u32,
    retry_interval: Duration,
    per_call_deadline: Duration,
) -> Result<()> {
    tracing::info!("waiting for ASR, LLM, and TTS workers to report healthy");
    for service in SERVICES {
        let mut healthy = false;
        for attempt in 0..attempts.max(1) {
            if transport.health_check(service, per_call_deadline).await {
                healthy = true;
                break;
            }
            tracing::debug!(service, attempt, "worker not yet healthy, retrying");
            tokio::time::sleep(retry_interval).await;
        }
        if !healthy {
            return Err(BlackboxError::Timeout {
                stage: service.to_owned(),
                budget_secs: f64::from(attempts.max(1)) * retry_interval.as_secs_f64(),
                elapsed_secs: f64::from(attempts.max(1)) * retry_interval.as_secs_f64(),
            });
        }
        tracing::info!(service, "worker healthy");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn times_out_naming_the_unresponsive_worker() {
        let dir = tempdir().expect("tempdir");
        let transport = Transport::new(TransportConfig {
            shm_dir: dir.path().to_path_buf(),
            poll_interval_ms: 5,
        });
        transport.initialize().await.expect("initialize");

        let result = wait_for_workers(
            &transport,
            2,
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .await;
        let err = result.expect_err("no worker ever responds");
        match err {
            BlackboxError::Timeout { stage, .. } => assert_eq!(stage, "asr"),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn succeeds_once_every_worker_answers_health() {
        let dir = tempdir().expect("tempdir");
        let transport = Transport::new(TransportConfig {
            shm_dir: dir.path().to_path_buf(),
            poll_interval_ms: 5,
        });
        transport.initialize().await.expect("initialize");

        let responder = {
            let dir = dir.path().to_path_buf();
            tokio::spawn(async move {
                for service in SERVICES {
                    let input_path = dir.join(format!("blackbox_{service}_in"));
                    let output_path = dir.join(format!("blackbox_{service}_out"));
                    for _ in 0..200 {
                        if let Ok(contents) = tokio::fs::read(&input_path).await {
                            if !contents.is_empty() {
                                if let Ok(value) =
                                    serde_json::from_slice::<serde_json::Value>(&contents)
                                {
                                    let id = value["id"].clone();
                                    let _ = tokio::fs::write(
                                        &output_path,
                                        serde_json::json!({"id": id, "result": {"status": "ok"}})
                                            .to_string(),
                                    )
                                    .await;
                                    break;
                                }
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            })
        };

        let result = wait_for_workers(
            &transport,
            50,
            Duration::from_millis(5),
            Duration::from_millis(200),
        )
        .await;
        responder.abort();
        assert!(result.is_ok());
    }
}
