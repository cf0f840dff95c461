//! Throttled error reporting
//!
//! Every failure in the pipeline is reported through [`ErrorReporter`]. A line is
//! emitted only by the caller that wins the throttle marker for its signature, so
//! a failure that repeats on every call produces one line per window.

use std::sync::Arc;
use std::time::Duration;
use telemetry_core::metrics::GateMetrics;
use telemetry_core::prelude::*;
use telemetry_core::key::error_marker_key;
use tracing::{debug, error};

/// `tracing` target of operator-visible failure lines
pub const ERROR_LOG_TARGET: &str = "telemetry::errors";

/// Log sink guarded by TTL markers
pub struct ErrorReporter {
    markers: Arc<dyn MarkerStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    metrics: GateMetrics,
}

impl ErrorReporter {
    /// Create a reporter suppressing repeats for `ttl`
    pub fn new(markers: Arc<dyn MarkerStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            markers,
            clock,
            ttl,
            metrics: GateMetrics::new("error_reporter"),
        }
    }

    /// Emit `message` unless `signature` was already reported within the window
    ///
    /// Returns true if the line was emitted. When the marker store itself is
    /// failing the line is emitted anyway.
    pub async fn log_throttled(&self, message: &str, signature: &str) -> bool {
        let key = error_marker_key(signature);

        match self.markers.try_mark(&key, self.clock.now(), self.ttl).await {
            Ok(true) => {
                error!(target: ERROR_LOG_TARGET, signature, "{}", message);
                true
            }
            Ok(false) => {
                debug!(signature, "Suppressed repeated error");
                self.metrics.record_suppressed();
                false
            }
            Err(e) => {
                error!(
                    target: ERROR_LOG_TARGET,
                    signature,
                    throttle_error = %e,
                    "{}",
                    message
                );
                true
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_errors;
    use chrono::{TimeZone, Utc};
    use telemetry_core::clock::ManualClock;
    use telemetry_store::{FailingStore, MemoryStore};

    fn reporter(markers: Arc<dyn MarkerStore>, clock: Arc<ManualClock>) -> ErrorReporter {
        ErrorReporter::new(markers, clock, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_repeats_suppressed_within_window() {
        let (logs, _guard) = capture_errors();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap(),
        ));
        let reporter = reporter(Arc::new(MemoryStore::new()), clock.clone());

        assert!(reporter.log_throttled("store down", "rate_limiter_a").await);
        assert!(!reporter.log_throttled("store down", "rate_limiter_a").await);
        assert!(reporter.log_throttled("other", "rate_limiter_b").await);

        clock.advance(Duration::from_secs(299));
        assert!(!reporter.log_throttled("store down", "rate_limiter_a").await);

        clock.advance(Duration::from_secs(1));
        assert!(reporter.log_throttled("store down", "rate_limiter_a").await);

        assert_eq!(logs.messages(), vec!["store down", "other", "store down"]);
    }

    #[tokio::test]
    async fn test_marker_failure_still_logs() {
        let (logs, _guard) = capture_errors();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reporter = reporter(Arc::new(FailingStore), clock);

        assert!(reporter.log_throttled("boom", "exception_unexpected").await);
        assert_eq!(logs.len(), 1);
    }
}
