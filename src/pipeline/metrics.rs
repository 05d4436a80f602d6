//! Rolling pipeline metrics: request counters, a 100-sample latency window,
//! and per-stage exponential moving averages.

use std::collections::{HashMap, VecDeque};

use super::Timing;

const LATENCY_WINDOW: usize = 100;
const EMA_ALPHA: f64 = 0.2;
const EMA_STAGES: [&str; 3] = ["asr", "llm", "tts"];

/// Snapshot of the coordinator's rolling performance counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency: f64,
    pub stage_averages: HashMap<String, f64>,
    latencies: VecDeque<f64>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_latency: 0.0,
            stage_averages: HashMap::new(),
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Record a successfully completed request's timing.
    pub fn record_success(&mut self, timing: &Timing) {
        self.total_requests += 1;
        self.successful_requests += 1;

        if let Some(total) = timing.get("total") {
            self.latencies.push_back(total);
            while self.latencies.len() > LATENCY_WINDOW {
                self.latencies.pop_front();
            }
            self.average_latency = self.latencies.iter().sum::<f64>() / self.latencies.len() as f64;
        }

        for stage in EMA_STAGES {
            if let Some(sample) = timing.get(stage) {
                let updated = match self.stage_averages.get(stage) {
                    Some(&prev) if prev != 0.0 => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * prev,
                    _ => sample,
                };
                self.stage_averages.insert(stage.to_owned(), updated);
            }
        }
    }

    /// Record a failed request (no latency/stage-average contribution).
    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing_with_total(total: f64) -> Timing {
        let mut t = Timing::new();
        t.set("total", total);
        t.set("asr", 1.0);
        t
    }

    #[test]
    fn average_latency_is_mean_of_window() {
        let mut metrics = Metrics::new();
        metrics.record_success(&timing_with_total(1.0));
        metrics.record_success(&timing_with_total(3.0));
        assert_eq!(metrics.average_latency, 2.0);
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.successful_requests, 2);
    }

    #[test]
    fn latency_window_caps_at_100_samples() {
        let mut metrics = Metrics::new();
        for _ in 0..150 {
            metrics.record_success(&timing_with_total(5.0));
        }
        assert_eq!(metrics.latencies.len(), LATENCY_WINDOW);
    }

    #[test]
    fn stage_ema_converges_toward_new_samples() {
        let mut metrics = Metrics::new();
        metrics.record_success(&timing_with_total(1.0));
        let first = metrics.stage_averages["asr"];
        assert_eq!(first, 1.0);

        let mut t = Timing::new();
        t.set("total", 1.0);
        t.set("asr", 2.0);
        metrics.record_success(&t);
        let second = metrics.stage_averages["asr"];
        assert!((second - (0.2 * 2.0 + 0.8 * 1.0)).abs() < 1e-9);
    }

    #[test]
    fn failure_increments_counters_without_latency() {
        let mut metrics = Metrics::new();
        metrics.record_failure();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.average_latency, 0.0);
    }
}
