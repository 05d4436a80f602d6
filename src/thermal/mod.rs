//! Background thermal sampler: reads platform temperature zones, runs a
//! hysteretic state machine, and notifies registered callbacks on
//! transitions.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ThermalConfig;

const THERMAL_BASE: &str = "/sys/class/thermal";
const MAX_ZONES_SCANNED: u32 = 10;

/// Thermal state, as described in the state machine below. Transitions into
/// `Critical` are sticky: only an explicit [`ThermalMonitor::trigger_cooldown`]
/// moves the monitor out of it, never a temperature drop on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalState {
    Normal,
    Warning,
    Critical,
    Cooldown,
}

impl ThermalState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ThermalState::Normal => "normal",
            ThermalState::Warning => "warning",
            ThermalState::Critical => "critical",
            ThermalState::Cooldown => "cooldown",
        }
    }
}

/// One temperature sample from one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalReading {
    pub zone: String,
    pub celsius: f64,
    pub timestamp: DateTime<Utc>,
}

type Callback = Box<dyn Fn(ThermalState, &HashMap<String, f64>) + Send + Sync>;

struct Inner {
    state: ThermalState,
    history: VecDeque<ThermalReading>,
    callbacks: HashMap<&'static str, Vec<Callback>>,
    last_temperatures: HashMap<String, f64>,
}

/// Samples platform thermal zones and exposes a throttle signal to the
/// coordinator.
pub struct ThermalMonitor {
    config: ThermalConfig,
    zones: HashMap<String, PathBuf>,
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThermalMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThermalMonitor")
            .field("zones", &self.zones.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ThermalMonitor {
    /// Build a monitor bound to `config`, discovering thermal zones now.
    #[must_use]
    pub fn new(config: ThermalConfig) -> Self {
        let zones = discover_thermal_zones();
        tracing::info!(
            warn_c = config.warn_c,
            critical_c = config.critical_c,
            zones = ?zones.keys().collect::<Vec<_>>(),
            "thermal monitor initialized"
        );
        Self {
            config,
            zones,
            inner: Arc::new(Mutex::new(Inner {
                state: ThermalState::Normal,
                history: VecDeque::new(),
                callbacks: HashMap::new(),
                last_temperatures: HashMap::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Register a callback invoked on every transition into `state`.
    pub async fn register_callback<F>(&self, state: ThermalState, callback: F)
    where
        F: Fn(ThermalState, &HashMap<String, f64>) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner
            .callbacks
            .entry(state.as_str())
            .or_default()
            .push(Box::new(callback));
    }

    /// Start the sampling loop. Idempotent: a second call logs a warning and
    /// does nothing.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("thermal monitor already running");
            return;
        }
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move { monitor.sample_loop().await });
        *self.handle.lock().await = Some(handle);
        tracing::info!("thermal monitoring started");
    }

    /// Stop the sampling loop, joining with a 5 s bound.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        tracing::info!("thermal monitoring stopped");
    }

    async fn sample_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(
            self.config.poll_interval_secs.max(0.01),
        ));
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.sample_once().await;
        }
    }

    async fn sample_once(&self) {
        let temperatures = read_all_zones(&self.zones);
        if temperatures.is_empty() {
            return;
        }
        let (hottest_zone, max_temp) = temperatures
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(zone, &temp)| (zone.clone(), temp))
            .expect("temperatures is non-empty");
        self.apply_reading(hottest_zone, max_temp, temperatures).await;
    }

    /// Record one reading, advance the state machine, and fire any callback
    /// registered for a newly entered state. Shared by the real sampling
    /// loop and [`ThermalMonitor::force_sample`] so both paths exercise the
    /// same callback-dispatch behavior.
    async fn apply_reading(
        &self,
        zone: String,
        celsius: f64,
        temperatures: HashMap<String, f64>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.last_temperatures = temperatures.clone();
        inner.history.push_back(ThermalReading {
            zone,
            celsius,
            timestamp: Utc::now(),
        });
        while inner.history.len() > self.config.history_capacity {
            inner.history.pop_front();
        }

        let old_state = inner.state;
        inner.state = next_state(old_state, celsius, &self.config);
        if inner.state != old_state {
            tracing::warn!(
                from = old_state.as_str(),
                to = inner.state.as_str(),
                max_temp = celsius,
                "thermal state changed"
            );
            let state = inner.state;
            let callbacks = inner.callbacks.get(state.as_str());
            if let Some(callbacks) = callbacks {
                for callback in callbacks {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        callback(state, &temperatures);
                    }));
                    if let Err(panic) = outcome {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_owned())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_owned());
                        tracing::error!(
                            state = state.as_str(),
                            panic = %message,
                            "thermal callback panicked, continuing sampler loop"
                        );
                    }
                }
            }
        }
    }

    /// Manually enter `Cooldown`. The only way out of `Critical`.
    pub async fn trigger_cooldown(&self) {
        let mut inner = self.inner.lock().await;
        let old_state = inner.state;
        inner.state = ThermalState::Cooldown;
        if old_state != ThermalState::Cooldown {
            tracing::warn!(from = old_state.as_str(), "manual cooldown triggered");
        }
    }

    /// Current thermal state.
    pub async fn state(&self) -> ThermalState {
        self.inner.lock().await.state
    }

    /// `state() ∈ {Critical, Cooldown}`.
    pub async fn should_throttle(&self) -> bool {
        matches!(
            self.state().await,
            ThermalState::Critical | ThermalState::Cooldown
        )
    }

    /// Most recent temperature per zone.
    pub async fn current_temperatures(&self) -> HashMap<String, f64> {
        self.inner.lock().await.last_temperatures.clone()
    }

    /// The bounded (FIFO-evicting) reading history.
    pub async fn history(&self) -> Vec<ThermalReading> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    /// Feed one reading directly into the state machine, bypassing the
    /// filesystem — used by tests, through the same callback-dispatch path
    /// as the real sampling loop.
    #[cfg(test)]
    async fn force_sample(&self, zone: &str, celsius: f64) {
        let mut temps = HashMap::new();
        temps.insert(zone.to_owned(), celsius);
        self.apply_reading(zone.to_owned(), celsius, temps).await;
    }
}

fn next_state(current: ThermalState, max_temp: f64, config: &ThermalConfig) -> ThermalState {
    match current {
        ThermalState::Cooldown => {
            if max_temp < config.cooldown_c {
                ThermalState::Normal
            } else {
                ThermalState::Cooldown
            }
        }
        ThermalState::Critical => ThermalState::Critical,
        ThermalState::Normal | ThermalState::Warning => {
            if max_temp >= config.critical_c {
                ThermalState::Critical
            } else if max_temp >= config.warn_c {
                ThermalState::Warning
            } else {
                ThermalState::Normal
            }
        }
    }
}

fn discover_thermal_zones() -> HashMap<String, PathBuf> {
    let mut zones = HashMap::new();
    let base = PathBuf::from(THERMAL_BASE);
    if !base.exists() {
        tracing::warn!(path = %base.display(), "thermal directory not found");
        return zones;
    }
    for i in 0..MAX_ZONES_SCANNED {
        let zone_dir = base.join(format!("thermal_zone{i}"));
        let temp_path = zone_dir.join("temp");
        let type_path = zone_dir.join("type");
        if !temp_path.exists() {
            continue;
        }
        match std::fs::read_to_string(&type_path) {
            Ok(label) => {
                zones.insert(label.trim().to_owned(), temp_path);
            }
            Err(e) => {
                tracing::warn!(zone = i, error = %e, "could not read thermal zone type");
            }
        }
    }
    zones
}

fn read_all_zones(zones: &HashMap<String, PathBuf>) -> HashMap<String, f64> {
    zones
        .iter()
        .filter_map(|(label, path)| read_millidegrees(path).map(|c| (label.clone(), c)))
        .collect()
}

fn read_millidegrees(path: &PathBuf) -> Option<f64> {
    let raw = std::fs::read_to_string(path).ok()?;
    let millidegrees: i64 = raw.trim().parse().ok()?;
    Some(millidegrees as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> ThermalMonitor {
        ThermalMonitor::new(ThermalConfig {
            warn_c: 75.0,
            critical_c: 85.0,
            cooldown_c: 70.0,
            poll_interval_secs: 2.0,
            history_capacity: 100,
        })
    }

    #[tokio::test]
    async fn hysteresis_walk_matches_state_machine() {
        let m = monitor();
        m.trigger_cooldown().await;
        m.force_sample("cpu", 69.0).await;
        assert_eq!(m.state().await, ThermalState::Normal);

        m.force_sample("cpu", 74.999).await;
        assert_eq!(m.state().await, ThermalState::Normal);

        m.force_sample("cpu", 75.0).await;
        assert_eq!(m.state().await, ThermalState::Warning);

        m.force_sample("cpu", 85.0).await;
        assert_eq!(m.state().await, ThermalState::Critical);

        // Stays critical even as temperature falls, until cooldown is
        // explicitly triggered.
        m.force_sample("cpu", 50.0).await;
        assert_eq!(m.state().await, ThermalState::Critical);

        m.trigger_cooldown().await;
        assert_eq!(m.state().await, ThermalState::Cooldown);
        m.force_sample("cpu", 69.0).await;
        assert_eq!(m.state().await, ThermalState::Normal);
    }

    #[tokio::test]
    async fn should_throttle_true_only_in_critical_or_cooldown() {
        let m = monitor();
        assert!(!m.should_throttle().await);
        m.force_sample("cpu", 90.0).await;
        assert!(m.should_throttle().await);
    }

    #[tokio::test]
    async fn history_is_capped_fifo() {
        let m = ThermalMonitor::new(ThermalConfig {
            history_capacity: 3,
            ..monitor().config
        });
        for t in [60.0, 61.0, 62.0, 63.0, 64.0] {
            m.force_sample("cpu", t).await;
        }
        let history = m.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().unwrap().celsius, 64.0);
    }

    #[tokio::test]
    async fn callback_fires_exactly_on_transition() {
        let m = Arc::new(monitor());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        m.register_callback(ThermalState::Warning, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        m.force_sample("cpu", 76.0).await;
        m.force_sample("cpu", 77.0).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_later_callbacks_or_sampling() {
        let m = Arc::new(monitor());
        m.register_callback(ThermalState::Warning, |_, _| {
            panic!("boom");
        })
        .await;
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        m.register_callback(ThermalState::Warning, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        m.force_sample("cpu", 76.0).await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "later callback still ran");
        assert_eq!(m.state().await, ThermalState::Warning, "state update survives a panicking callback");

        m.force_sample("cpu", 50.0).await;
        assert_eq!(m.state().await, ThermalState::Normal, "sampler keeps running after the panic");
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let m = Arc::new(monitor());
        m.start().await;
        m.start().await;
        m.stop().await;
        m.stop().await;
    }
}
