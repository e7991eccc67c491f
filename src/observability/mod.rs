//! Per-stage latency, blame attribution, and labeled result counters (C10).

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};
use std::time::Instant;

pub static STAGE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "verify_stage_latency_seconds",
        "Latency of an issuance pipeline stage",
        &["stage"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

pub static RESULT_COUNT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "verify_results_total",
        "Total number of terminal results, labeled by stage/blame/result tag",
        &["stage", "blame", "result"]
    )
    .unwrap()
});

/// Records one terminal observation for a pipeline stage: a result tag
/// (SCREAMING_SNAKE_CASE, e.g. `UUID_CONFLICT`) and who is to blame
/// (`client`, `server`, or `none`).
pub fn record(stage: &str, blame: &str, result: &'static str, latency_seconds: f64) {
    STAGE_LATENCY.with_label_values(&[stage]).observe(latency_seconds);
    RESULT_COUNT.with_label_values(&[stage, blame, result]).inc();
}

/// A per-request deferred hook: records `(blame, result, latency)` exactly
/// once, when dropped, regardless of which return path the handler took.
/// Call [`ObservabilityScope::finish`] to set the outcome before the guard
/// goes out of scope; an unfinished scope records `SERVER_PANIC_OR_EARLY_RETURN`.
pub struct ObservabilityScope {
    stage: &'static str,
    started: Instant,
    outcome: Option<(&'static str, &'static str)>,
}

impl ObservabilityScope {
    pub fn start(stage: &'static str) -> Self {
        ObservabilityScope {
            stage,
            started: Instant::now(),
            outcome: None,
        }
    }

    pub fn finish(&mut self, blame: &'static str, result: &'static str) {
        self.outcome = Some((blame, result));
    }
}

impl Drop for ObservabilityScope {
    fn drop(&mut self) {
        let (blame, result) = self
            .outcome
            .unwrap_or(("server", "SERVER_PANIC_OR_EARLY_RETURN"));
        record(self.stage, blame, result, self.started.elapsed().as_secs_f64());
    }
}
