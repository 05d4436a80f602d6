//! `blackbox-orchestratord`: builds the application context, waits for the
//! three inference workers to come up, and runs until shutdown.
//!
//! The outer HTTP front-end that would drive `AppContext::coordinator` from
//! client requests is out of scope for this crate (spec.md §1); this binary
//! only owns process lifecycle — config loading, tracing setup, readiness,
//! and graceful shutdown on Ctrl+C.

use std::path::PathBuf;
use std::time::Duration;

use blackbox_core::config::OrchestratorConfig;
use blackbox_core::startup;
use blackbox_core::AppContext;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const READY_ATTEMPTS: u32 = 30;
const READY_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const READY_CALL_DEADLINE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("BLACKBOX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(blackbox_core::dirs::config_file);
    let config = OrchestratorConfig::load(Some(&config_path))?;
    let _log_guard = init_tracing(&config);

    tracing::info!(config_path = %config_path.display(), "loaded configuration");

    let ctx = AppContext::build(config).await?;

    if let Err(e) = startup::wait_for_workers(
        &ctx.transport,
        READY_ATTEMPTS,
        READY_RETRY_INTERVAL,
        READY_CALL_DEADLINE,
    )
    .await
    {
        tracing::warn!(error = %e, "one or more workers never became healthy; continuing anyway");
    }

    tracing::info!("blackbox-orchestratord ready");

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());
    shutdown.cancelled().await;
    tracing::info!("received shutdown signal");
    ctx.shutdown().await;
    Ok(())
}

/// Cancel `token` on Ctrl+C (all platforms) or SIGTERM (unix — the signal a
/// systemd unit or container runtime sends on stop).
fn spawn_signal_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        token.cancel();
    });
}

/// Install the global subscriber. Returns the file-appender guard, if a
/// `logging.log_path` is configured — it must be held for the process
/// lifetime or buffered log lines are dropped on exit.
fn init_tracing(config: &OrchestratorConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.logging.log_path {
        Some(log_dir) => {
            let file_appender =
                tracing_appender::rolling::daily(log_dir, "blackbox-orchestratord.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            subscriber.with_writer(non_blocking).init();
            Some(guard)
        }
        None => {
            subscriber.init();
            None
        }
    }
}
