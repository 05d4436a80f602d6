//! Configuration types for the orchestration core.
//!
//! Values load from, in increasing precedence: the [`Default`] impls below,
//! an optional TOML file, then environment variables prefixed `BLACKBOX_`.
//! Unknown keys in the TOML document are rejected at load time — see
//! [`OrchestratorConfig::load`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// User identifier used when a request does not supply one.
    pub default_user: String,
    /// Shared-memory transport paths and poll interval.
    pub transport: TransportConfig,
    /// Per-stage and total pipeline deadlines.
    pub deadlines: DeadlineConfig,
    /// Conversation context retrieval settings.
    pub context: ContextConfig,
    /// Thermal sampler thresholds and cadence.
    pub thermal: ThermalConfig,
    /// Argon2 password-verifier parameters.
    pub security: SecurityConfig,
    /// Context & side-effect store settings.
    pub store: StoreConfig,
    /// Logging setup.
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_user: "default_user".to_owned(),
            transport: TransportConfig::default(),
            deadlines: DeadlineConfig::default(),
            context: ContextConfig::default(),
            thermal: ThermalConfig::default(),
            security: SecurityConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// `BLACKBOX_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if `toml_path` is `Some` and the file exists but
    /// fails to parse, or if it contains unknown top-level keys.
    pub fn load(toml_path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let mut config = match toml_path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)
                    .map_err(|e| crate::error::BlackboxError::Config(e.to_string()))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `BLACKBOX_*` environment variable overrides on top of whatever
    /// was loaded from defaults/TOML. Unrecognized variables are ignored;
    /// malformed values for a recognized variable are logged and skipped
    /// rather than failing startup.
    fn apply_env_overrides(&mut self) {
        macro_rules! env_f64 {
            ($var:expr, $field:expr) => {
                if let Some(v) = parse_env::<f64>($var) {
                    $field = v;
                }
            };
        }
        macro_rules! env_usize {
            ($var:expr, $field:expr) => {
                if let Some(v) = parse_env::<usize>($var) {
                    $field = v;
                }
            };
        }
        macro_rules! env_u32 {
            ($var:expr, $field:expr) => {
                if let Some(v) = parse_env::<u32>($var) {
                    $field = v;
                }
            };
        }

        if let Ok(v) = std::env::var("BLACKBOX_DEFAULT_USER") {
            self.default_user = v;
        }
        env_f64!("BLACKBOX_TOTAL_DEADLINE_SECS", self.deadlines.total_secs);
        env_f64!("BLACKBOX_ASR_DEADLINE_SECS", self.deadlines.asr_secs);
        env_f64!("BLACKBOX_LLM_DEADLINE_SECS", self.deadlines.llm_secs);
        env_f64!("BLACKBOX_TTS_DEADLINE_SECS", self.deadlines.tts_secs);
        env_usize!("BLACKBOX_CONTEXT_LIMIT", self.context.limit);
        env_f64!("BLACKBOX_THERMAL_WARN_C", self.thermal.warn_c);
        env_f64!("BLACKBOX_THERMAL_CRITICAL_C", self.thermal.critical_c);
        env_f64!("BLACKBOX_THERMAL_COOLDOWN_C", self.thermal.cooldown_c);
        env_f64!(
            "BLACKBOX_THERMAL_POLL_SECS",
            self.thermal.poll_interval_secs
        );
        env_u32!(
            "BLACKBOX_TRANSPORT_POLL_MS",
            self.transport.poll_interval_ms
        );
        env_u32!("BLACKBOX_ARGON2_TIME_COST", self.security.argon2_time_cost);
        env_u32!(
            "BLACKBOX_ARGON2_MEMORY_COST_KIB",
            self.security.argon2_memory_cost_kib
        );
        env_u32!(
            "BLACKBOX_ARGON2_PARALLELISM",
            self.security.argon2_parallelism
        );
        if let Ok(v) = std::env::var("BLACKBOX_STORE_DB_PATH") {
            self.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BLACKBOX_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Validate invariants that can't be expressed through `serde` alone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BlackboxError::Config`] if `thermal.cooldown_c`
    /// is not strictly below `thermal.warn_c`, which is not strictly below
    /// `thermal.critical_c`.
    pub fn validate(&self) -> crate::error::Result<()> {
        let t = &self.thermal;
        if !(t.cooldown_c < t.warn_c && t.warn_c < t.critical_c) {
            return Err(crate::error::BlackboxError::Config(format!(
                "thermal thresholds must satisfy cooldown < warn < critical, got {} < {} < {}",
                t.cooldown_c, t.warn_c, t.critical_c
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    match std::env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var, raw, "ignoring unparseable environment override");
                None
            }
        },
        Err(_) => None,
    }
}

/// Shared-memory transport paths, one pair per worker, and the poll cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Directory containing the six transport files.
    pub shm_dir: PathBuf,
    /// Poll interval while waiting for a worker response, in milliseconds.
    pub poll_interval_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            shm_dir: PathBuf::from("/dev/shm"),
            poll_interval_ms: 10,
        }
    }
}

impl TransportConfig {
    /// `<shm_dir>/blackbox_<service>_in`.
    #[must_use]
    pub fn input_path(&self, service: &str) -> PathBuf {
        self.shm_dir.join(format!("blackbox_{service}_in"))
    }

    /// `<shm_dir>/blackbox_<service>_out`.
    #[must_use]
    pub fn output_path(&self, service: &str) -> PathBuf {
        self.shm_dir.join(format!("blackbox_{service}_out"))
    }
}

/// Per-stage and total pipeline deadlines, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Overall request budget (advisory; logged, not enforced against an
    /// in-flight stage — the stage's own deadline is authoritative).
    pub total_secs: f64,
    /// ASR stage budget.
    pub asr_secs: f64,
    /// LLM stage budget.
    pub llm_secs: f64,
    /// TTS stage budget.
    pub tts_secs: f64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            total_secs: 13.0,
            asr_secs: 2.5,
            llm_secs: 7.5,
            tts_secs: 1.5,
        }
    }
}

/// Conversation context retrieval settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum number of turns returned by `get_context`.
    pub limit: usize,
    /// Number of most-recent turns folded into the LLM prompt.
    pub prompt_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            prompt_turns: 5,
        }
    }
}

/// Thermal sampler thresholds and cadence, in degrees Celsius / seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Enter `Warning` at or above this temperature.
    pub warn_c: f64,
    /// Enter `Critical` at or above this temperature.
    pub critical_c: f64,
    /// Exit `Cooldown` to `Normal` below this temperature.
    pub cooldown_c: f64,
    /// Seconds between temperature samples.
    pub poll_interval_secs: f64,
    /// Number of readings retained in the ring buffer.
    pub history_capacity: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            warn_c: 75.0,
            critical_c: 85.0,
            cooldown_c: 70.0,
            poll_interval_secs: 2.0,
            history_capacity: 100,
        }
    }
}

/// Argon2 password-verifier parameters for vault authentication material.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 time cost (number of iterations).
    pub argon2_time_cost: u32,
    /// Argon2 memory cost in kibibytes.
    pub argon2_memory_cost_kib: u32,
    /// Argon2 degree of parallelism.
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_time_cost: 3,
            argon2_memory_cost_kib: 65_536,
            argon2_parallelism: 4,
        }
    }
}

/// Context & side-effect store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the embedded database file. Parent directories are created on
    /// open if missing.
    pub db_path: PathBuf,
    /// Days of conversation history retained by `prune_old_turns` when run by
    /// the periodic maintenance task.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: crate::dirs::default_db_path(),
            retention_days: 30,
        }
    }
}

/// Logging setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"info"`, `"debug"`.
    pub level: String,
    /// When set, additionally writes rolling log files to this directory.
    pub log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            log_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_surface() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.default_user, "default_user");
        assert_eq!(config.deadlines.total_secs, 13.0);
        assert_eq!(config.deadlines.asr_secs, 2.5);
        assert_eq!(config.deadlines.llm_secs, 7.5);
        assert_eq!(config.deadlines.tts_secs, 1.5);
        assert_eq!(config.context.limit, 10);
        assert_eq!(config.thermal.warn_c, 75.0);
        assert_eq!(config.thermal.critical_c, 85.0);
        assert_eq!(config.thermal.cooldown_c, 70.0);
        assert_eq!(config.thermal.poll_interval_secs, 2.0);
        assert_eq!(config.transport.poll_interval_ms, 10);
        assert_eq!(config.security.argon2_time_cost, 3);
        assert_eq!(config.security.argon2_memory_cost_kib, 65_536);
        assert_eq!(config.security.argon2_parallelism, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_thermal_thresholds() {
        let mut config = OrchestratorConfig::default();
        config.thermal.warn_c = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_rejects_unknown_toml_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "totally_unknown_field = 1\n").expect("write");
        assert!(OrchestratorConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn load_reads_valid_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_user = \"alice\"\n").expect("write");
        let config = OrchestratorConfig::load(Some(&path)).expect("load");
        assert_eq!(config.default_user, "alice");
    }

    #[test]
    fn transport_paths_follow_naming_convention() {
        let config = TransportConfig::default();
        assert_eq!(
            config.input_path("asr"),
            PathBuf::from("/dev/shm/blackbox_asr_in")
        );
        assert_eq!(
            config.output_path("tts"),
            PathBuf::from("/dev/shm/blackbox_tts_out")
        );
    }
}
