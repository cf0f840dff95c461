//! Metrics for the telemetry gate
//!
//! Provides Prometheus-compatible metrics for observability.

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    // Gate metrics
    pub const GATE_DECISIONS_TOTAL: &str = "telemetry_gate_decisions_total";
    pub const STORAGE_ERRORS_TOTAL: &str = "telemetry_storage_errors_total";
    pub const CLEANUP_RUNS_TOTAL: &str = "telemetry_cleanup_runs_total";

    // Reporter metrics
    pub const ERRORS_SUPPRESSED_TOTAL: &str = "telemetry_errors_suppressed_total";

    // Transport metrics
    pub const SENDS_TOTAL: &str = "telemetry_sends_total";
    pub const SEND_LATENCY: &str = "telemetry_send_latency_seconds";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const POLICY: &str = "policy";
    pub const OUTCOME: &str = "outcome";
    pub const OPERATION: &str = "operation";
    pub const PREFIX: &str = "prefix";
    pub const STATUS: &str = "status";
}

/// Gate metrics
#[derive(Clone)]
pub struct GateMetrics {
    component: String,
}

impl GateMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record an allow/deny decision
    pub fn record_decision(&self, policy: &str, allowed: bool) {
        counter!(
            names::GATE_DECISIONS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::POLICY => policy.to_string(),
            labels::OUTCOME => if allowed { "allow" } else { "deny" },
        )
        .increment(1);
    }

    /// Record a store failure
    pub fn record_storage_error(&self, operation: &str) {
        counter!(
            names::STORAGE_ERRORS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::OPERATION => operation.to_string(),
        )
        .increment(1);
    }

    /// Record a cleanup sweep
    pub fn record_cleanup(&self, prefix: &str, status: &str) {
        counter!(
            names::CLEANUP_RUNS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::PREFIX => prefix.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Record a throttled (suppressed) log line
    pub fn record_suppressed(&self) {
        counter!(
            names::ERRORS_SUPPRESSED_TOTAL,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }
}

/// Transport metrics
#[derive(Clone)]
pub struct TransportMetrics {
    component: String,
}

impl TransportMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a send attempt outcome
    pub fn record_send(&self, status: &str) {
        counter!(
            names::SENDS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Record send latency
    pub fn record_send_latency(&self, duration: Duration) {
        histogram!(
            names::SEND_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer_records_once() {
        let mut recorded = Vec::new();
        {
            let timer = LatencyTimer::start(|d| recorded.push(d));
            std::thread::sleep(Duration::from_millis(5));
            timer.stop();
        }
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0] >= Duration::from_millis(5));
    }
}
