//! Allow/deny decisions for outbound events
//!
//! ## Decision flow
//!
//! ```text
//! action ─► sanitize ─► policy
//!                         ├─ Unbounded   ─► allow
//!                         ├─ OncePerDay  ─► get ─► try_claim ─► (re-get on lost race)
//!                         └─ CountPerDay ─► get ─► increment_and_get ─► compare
//! ```
//!
//! Any store failure denies the event and is reported through the
//! [`ErrorReporter`]; nothing propagates to the caller.

use std::sync::Arc;
use telemetry_core::config::LimitsConfig;
use telemetry_core::metrics::GateMetrics;
use telemetry_core::prelude::*;
use telemetry_core::sanitize::sanitize_text;
use tracing::{debug, warn};

use crate::cleanup::CleanupScheduler;
use crate::reporter::ErrorReporter;

/// Sanitized, non-empty action of `params`
pub fn action_of(params: &EventParams) -> Result<String> {
    let raw = params
        .action()
        .ok_or_else(|| TelemetryError::validation("Event has no action"))?;
    let action = sanitize_text(raw);
    if action.is_empty() {
        return Err(TelemetryError::validation("Event action is empty"));
    }
    Ok(action)
}

/// Per-action daily dedup and rate limiting
pub struct EventGate {
    store: Arc<dyn DedupStore>,
    policies: Arc<dyn PolicyProvider>,
    cleanup: CleanupScheduler,
    reporter: Arc<ErrorReporter>,
    clock: Arc<dyn Clock>,
    metrics: GateMetrics,
}

impl EventGate {
    pub fn new(
        store: Arc<dyn DedupStore>,
        policies: Arc<dyn PolicyProvider>,
        cleanup: CleanupScheduler,
        reporter: Arc<ErrorReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policies,
            cleanup,
            reporter,
            clock,
            metrics: GateMetrics::new("gate"),
        }
    }

    /// Wire a gate, its cleanup scheduler and a reporter over shared stores
    pub fn from_parts(
        store: Arc<dyn DedupStore>,
        markers: Arc<dyn MarkerStore>,
        policies: Arc<dyn PolicyProvider>,
        clock: Arc<dyn Clock>,
        limits: &LimitsConfig,
    ) -> Self {
        let reporter = Arc::new(ErrorReporter::new(
            markers.clone(),
            clock.clone(),
            limits.error_throttle,
        ));
        let cleanup = CleanupScheduler::new(
            store.clone(),
            markers,
            reporter.clone(),
            clock.clone(),
            limits.cleanup_interval,
        );
        Self::new(store, policies, cleanup, reporter, clock)
    }

    /// Reporter shared with downstream stages
    pub fn reporter(&self) -> Arc<ErrorReporter> {
        self.reporter.clone()
    }

    /// Decide whether the event may be sent now
    ///
    /// Events without a usable action are denied silently.
    pub async fn evaluate(&self, params: &EventParams) -> bool {
        let action = match action_of(params) {
            Ok(action) => action,
            Err(e) => {
                debug!(error = %e, "Event rejected");
                return false;
            }
        };

        let policy = self.policies.policy_for(&action);
        let decision = match policy {
            EventPolicy::Unbounded => Ok(true),
            EventPolicy::OncePerDay => self.evaluate_once(&action).await,
            EventPolicy::CountPerDay { max } => self.evaluate_count(&action, max).await,
        };

        let allowed = match decision {
            Ok(allowed) => allowed,
            Err(e) => {
                let signature = match policy {
                    EventPolicy::CountPerDay { .. } => format!("counter_increment_{}", action),
                    _ => format!("rate_limiter_{}", action),
                };
                warn!(action = %action, policy = policy.label(), error = %e, "Denied on store failure");
                self.metrics.record_storage_error(policy.label());
                self.reporter
                    .log_throttled(
                        &format!("Telemetry {} check for {} failed: {}", policy.label(), action, e),
                        &signature,
                    )
                    .await;
                false
            }
        };

        self.metrics.record_decision(policy.label(), allowed);
        debug!(action = %action, policy = policy.label(), allowed, "Gate decision");
        allowed
    }

    async fn evaluate_once(&self, action: &str) -> Result<bool> {
        let key = DedupKey::new(KeyPrefix::Once, action, self.clock.today());
        let key_str = key.as_string();

        if self.store.get(&key_str).await?.is_some() {
            return Ok(false);
        }

        let stamp = self.clock.now().timestamp().to_string();
        if self.store.try_claim(&key_str, &stamp).await? {
            self.cleanup.maybe_schedule(&key).await;
            return Ok(true);
        }

        // Lost the race: the winner's entry must be visible now
        match self.store.get(&key_str).await? {
            Some(_) => Ok(false),
            None => Err(TelemetryError::storage(format!(
                "Claim on {} refused but no entry exists",
                key_str
            ))),
        }
    }

    async fn evaluate_count(&self, action: &str, max: i64) -> Result<bool> {
        let key = DedupKey::new(KeyPrefix::Count, action, self.clock.today());
        let key_str = key.as_string();

        let current = self
            .store
            .get(&key_str)
            .await?
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(0);
        if current >= max {
            return Ok(false);
        }

        // May overshoot max by the number of racing callers; they are still denied
        let count = self.store.increment_and_get(&key_str).await?;
        if count > max {
            return Ok(false);
        }

        self.cleanup.maybe_schedule(&key).await;
        Ok(true)
    }
}
