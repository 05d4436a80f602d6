//! blackbox-core: the orchestration core of an on-device voice assistant.
//!
//! Captured audio goes in; a transcription, a response, synthesized speech,
//! and structured side-effect requests come out. Four subsystems do the
//! work:
//!
//! - [`pipeline`] — the coordinator: fans a request across ASR, LLM, and TTS
//!   workers under per-stage deadlines, dispatches function calls, and
//!   updates conversational context.
//! - [`transport`] — a request/response channel to each worker over a
//!   shared-memory-backed filesystem path.
//! - [`thermal`] — a background sampler exposing a hysteretic throttle
//!   signal for a constrained single-board accelerator platform.
//! - [`store`] — durable conversation history, reminders, vault items, and
//!   media-library entries behind a small synchronous API.
//!
//! [`app::AppContext`] wires the four together for the process lifetime;
//! [`config::OrchestratorConfig`] is the crate's single validated
//! configuration surface.

pub mod app;
pub mod config;
pub mod dirs;
pub mod error;
pub mod pipeline;
pub mod startup;
pub mod store;
pub mod thermal;
pub mod transport;

pub use app::AppContext;
pub use config::OrchestratorConfig;
pub use error::{BlackboxError, Result};
pub use pipeline::{PipelineCoordinator, PipelineResult, TranscriptionResult};
