//! Lazy removal of stale per-day entries
//!
//! A sweep runs inline after a successful claim or increment. The cleanup marker is
//! set before anything is deleted, so of any number of concurrent callers only the
//! one that wins the marker sweeps, and at most once per interval.

use std::sync::Arc;
use std::time::Duration;
use telemetry_core::key::cleanup_marker_key;
use telemetry_core::metrics::GateMetrics;
use telemetry_core::prelude::*;
use tracing::{debug, info};

use crate::reporter::ErrorReporter;

/// What a call to [`CleanupScheduler::maybe_schedule`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// A sweep already ran within the interval
    Skipped,
    /// Sweep ran; number of entries removed
    Swept(u64),
    /// Sweep failed and was reported
    Failed,
}

/// Rate-limited sweeper for one `{prefix, action}` family at a time
pub struct CleanupScheduler {
    store: Arc<dyn DedupStore>,
    markers: Arc<dyn MarkerStore>,
    reporter: Arc<ErrorReporter>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    metrics: GateMetrics,
}

impl CleanupScheduler {
    pub fn new(
        store: Arc<dyn DedupStore>,
        markers: Arc<dyn MarkerStore>,
        reporter: Arc<ErrorReporter>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            markers,
            reporter,
            clock,
            interval,
            metrics: GateMetrics::new("cleanup"),
        }
    }

    /// Delete every entry of `today`'s family except `today` itself, at most once
    /// per interval
    pub async fn maybe_schedule(&self, today: &DedupKey) -> CleanupOutcome {
        let prefix = today.prefix();
        let action = today.action();
        let marker = cleanup_marker_key(prefix, action);
        let signature = format!("cleanup_{}", action);
        let now = self.clock.now();

        let claimed = match self.markers.has_marker(&marker, now).await {
            Ok(true) => Ok(false),
            Ok(false) => self.markers.try_mark(&marker, now, self.interval).await,
            Err(e) => Err(e),
        };

        match claimed {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.record_cleanup(prefix.label(), "skipped");
                return CleanupOutcome::Skipped;
            }
            Err(e) => {
                // Without the marker there is no bound on sweeps
                self.metrics.record_storage_error("cleanup_marker");
                self.metrics.record_cleanup(prefix.label(), "failed");
                self.reporter
                    .log_throttled(
                        &format!("Cleanup marker for {}{} unavailable: {}", prefix, action, e),
                        &signature,
                    )
                    .await;
                return CleanupOutcome::Failed;
            }
        }

        match self.store.delete_except(&today.family(), &today.as_string()).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(prefix = %prefix, action, deleted, "Removed stale telemetry entries");
                }
                self.metrics.record_cleanup(prefix.label(), "swept");
                self.purge_markers(now).await;
                CleanupOutcome::Swept(deleted)
            }
            Err(e) => {
                self.metrics.record_storage_error("delete_except");
                self.metrics.record_cleanup(prefix.label(), "failed");
                self.reporter
                    .log_throttled(
                        &format!("Cleanup of {}{} failed: {}", prefix, action, e),
                        &signature,
                    )
                    .await;
                CleanupOutcome::Failed
            }
        }
    }

    async fn purge_markers(&self, now: chrono::DateTime<chrono::Utc>) {
        match self.markers.purge_expired(now).await {
            Ok(removed) => debug!(removed, "Purged expired markers"),
            Err(e) => debug!(error = %e, "Marker purge failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_errors;
    use chrono::{NaiveDate, TimeZone, Utc};
    use telemetry_core::clock::ManualClock;
    use telemetry_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        scheduler: CleanupScheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 7, 9, 0, 0).unwrap(),
        ));
        let reporter = Arc::new(ErrorReporter::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(300),
        ));
        let scheduler = CleanupScheduler::new(
            store.clone(),
            store.clone(),
            reporter,
            clock.clone(),
            Duration::from_secs(3600),
        );
        Fixture {
            store,
            clock,
            scheduler,
        }
    }

    fn key(day: u32) -> DedupKey {
        DedupKey::new(
            KeyPrefix::Count,
            "promo_banner_shown",
            NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sweeps_at_most_once_per_interval() {
        let f = fixture();
        f.store.insert(key(5).as_string(), "3");
        f.store.insert(key(6).as_string(), "3");
        f.store.insert(key(7).as_string(), "1");

        assert_eq!(f.scheduler.maybe_schedule(&key(7)).await, CleanupOutcome::Swept(2));
        assert_eq!(f.store.keys(), vec![key(7).as_string()]);

        // A stale entry appearing later is left alone until the marker expires
        f.store.insert(key(6).as_string(), "3");
        f.clock.advance(Duration::from_secs(59 * 60));
        assert_eq!(f.scheduler.maybe_schedule(&key(7)).await, CleanupOutcome::Skipped);
        assert_eq!(f.store.keys().len(), 2);

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.scheduler.maybe_schedule(&key(7)).await, CleanupOutcome::Swept(1));
    }

    #[tokio::test]
    async fn test_marker_is_per_prefix_and_action() {
        let f = fixture();
        let once = DedupKey::new(KeyPrefix::Once, "promo_banner_shown", key(7).date());
        let other = DedupKey::new(KeyPrefix::Count, "other", key(7).date());

        assert!(matches!(f.scheduler.maybe_schedule(&key(7)).await, CleanupOutcome::Swept(_)));
        assert!(matches!(f.scheduler.maybe_schedule(&once).await, CleanupOutcome::Swept(_)));
        assert!(matches!(f.scheduler.maybe_schedule(&other).await, CleanupOutcome::Swept(_)));
        assert_eq!(f.scheduler.maybe_schedule(&other).await, CleanupOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_failed_delete_reported_not_retried() {
        let (logs, _guard) = capture_errors();
        let f = fixture();
        f.store.insert(key(6).as_string(), "3");
        f.store.set_fail_deletes(true);

        assert_eq!(f.scheduler.maybe_schedule(&key(7)).await, CleanupOutcome::Failed);
        assert_eq!(logs.len(), 1);

        // Marker stays set: no retry within the interval even after recovery
        f.store.set_fail_deletes(false);
        assert_eq!(f.scheduler.maybe_schedule(&key(7)).await, CleanupOutcome::Skipped);
        assert_eq!(f.store.keys(), vec![key(6).as_string()]);
    }
}
