//! # Telemetry Sender
//!
//! The evaluate-then-send entry point for telemetry events.
//!
//! ## Flow
//!
//! ```text
//! dispatch(params, headers)
//!     ├─► store eligibility probe   (skip when the marker store is unusable)
//!     ├─► EventGate::evaluate       (skip when denied)
//!     └─► EventTransport::send      (enrich + POST)
//! ```
//!
//! `dispatch` always returns an [`EventResult`]; callers treat it as
//! fire-and-forget. A panic in any stage, including store and policy
//! implementations, is caught and reported as `exception_unexpected`.

pub mod collector;
pub mod enrich;
pub mod site;
pub mod transport;

pub use collector::*;
pub use enrich::*;
pub use site::*;
pub use transport::*;

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use telemetry_core::clock::SystemClock;
use telemetry_core::config::SiteConfig;
use telemetry_core::policy::StaticPolicyProvider;
use telemetry_core::prelude::*;
use telemetry_core::strategy::NoImpersonation;
use telemetry_gate::{ErrorReporter, EventGate};
use telemetry_store::SqliteStore;
use tracing::{debug, info};

/// Marker proving the marker store round-trips
pub const ELIGIBILITY_MARKER: &str = "check_transients";

/// Collaborators of an [`EventDispatcher`]
pub struct DispatcherParts {
    pub store: Arc<dyn DedupStore>,
    pub markers: Arc<dyn MarkerStore>,
    pub policies: Arc<dyn PolicyProvider>,
    pub collector: Arc<dyn Collector>,
    pub impersonation: Arc<dyn ImpersonationSource>,
    pub clock: Arc<dyn Clock>,
}

/// Single entry point: probe, gate, send
pub struct EventDispatcher {
    gate: EventGate,
    transport: EventTransport,
    markers: Arc<dyn MarkerStore>,
    reporter: Arc<ErrorReporter>,
    clock: Arc<dyn Clock>,
    site: SiteConfig,
    eligibility_ttl: Duration,
}

impl EventDispatcher {
    pub fn new(parts: DispatcherParts, config: &TelemetryConfig) -> Self {
        let gate = EventGate::from_parts(
            parts.store,
            parts.markers.clone(),
            parts.policies,
            parts.clock.clone(),
            &config.limits,
        );
        let reporter = gate.reporter();
        let enricher = Enricher::new(
            config.site.url.clone(),
            parts.impersonation,
            parts.clock.clone(),
        );
        let transport = EventTransport::new(enricher, parts.collector, reporter.clone());

        Self {
            gate,
            transport,
            markers: parts.markers,
            reporter,
            clock: parts.clock,
            site: config.site.clone(),
            eligibility_ttl: config.limits.eligibility_interval,
        }
    }

    /// Production wiring: SQLite store, HTTP collector, static policies
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store)?);
        let collector = Arc::new(HttpCollector::new(config.collector.clone())?);

        info!(
            store = %store.path().display(),
            collector = %config.collector.url(),
            once_per_day = config.policy.once_per_day.len(),
            count_per_day = config.policy.count_per_day.len(),
            "Event dispatcher ready"
        );

        let parts = DispatcherParts {
            store: store.clone(),
            markers: store,
            policies: Arc::new(StaticPolicyProvider::from_config(&config.policy)),
            collector,
            impersonation: Arc::new(NoImpersonation),
            clock: Arc::new(SystemClock::with_offset_minutes(config.site.utc_offset_minutes)),
        };
        Ok(Self::new(parts, config))
    }

    /// Evaluate the event and send it if allowed
    pub async fn dispatch(&self, params: EventParams, headers: &Headers) -> EventResult {
        match AssertUnwindSafe(self.evaluate_and_send(params, headers))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let detail = transport::panic_message(panic.as_ref());
                self.reporter
                    .log_throttled(
                        &format!("Telemetry dispatch panicked: {}", detail),
                        &format!("exception_{}", ErrorKind::Unexpected),
                    )
                    .await;
                EventResult::generic_error()
            }
        }
    }

    async fn evaluate_and_send(&self, params: EventParams, headers: &Headers) -> EventResult {
        if !self.is_store_eligible().await {
            return EventResult::Skipped;
        }
        if !self.gate.evaluate(&params).await {
            return EventResult::Skipped;
        }
        self.transport.send(params, headers).await
    }

    /// Send the site edit event when the site identity is complete
    pub async fn send_site_edit(&self, headers: &Headers) -> EventResult {
        let event = SiteEditEvent::from_site(&self.site);
        if !event.is_eligible() {
            debug!("Site identity incomplete, edit event not sent");
            return EventResult::Skipped;
        }
        self.dispatch(event.to_params(), headers).await
    }

    async fn probe_markers(&self) -> Result<bool> {
        let now = self.clock.now();
        if self.markers.has_marker(ELIGIBILITY_MARKER, now).await? {
            return Ok(true);
        }
        self.markers
            .try_mark(ELIGIBILITY_MARKER, now, self.eligibility_ttl)
            .await?;
        self.markers.has_marker(ELIGIBILITY_MARKER, now).await
    }

    /// True when the marker store accepts and returns a probe marker
    async fn is_store_eligible(&self) -> bool {
        match self.probe_markers().await {
            Ok(true) => true,
            Ok(false) => {
                self.reporter
                    .log_throttled("Telemetry marker did not persist", ELIGIBILITY_MARKER)
                    .await;
                false
            }
            Err(e) => {
                self.reporter
                    .log_throttled(
                        &format!("Telemetry marker store unavailable: {}", e),
                        ELIGIBILITY_MARKER,
                    )
                    .await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use telemetry_core::clock::ManualClock;
    use telemetry_core::message::ImpersonationContext;
    use telemetry_core::strategy::StaticImpersonation;
    use telemetry_gate::testing::capture_errors;
    use telemetry_store::MemoryStore;

    const SURVEY: &str = "wordpress.chatbot.survey_filled";

    struct Harness {
        store: Arc<MemoryStore>,
        collector: Arc<RecordingCollector>,
        clock: Arc<ManualClock>,
        dispatcher: EventDispatcher,
    }

    fn config() -> TelemetryConfig {
        let mut config = TelemetryConfig::default();
        config.site.url = Some("https://example.com/mysite/".to_string());
        config.site.builder_type = "ai".to_string();
        config.site.website_id = "w-1".to_string();
        config.site.subscription_id = "s-1".to_string();
        config.policy.once_per_day = vec![SURVEY.to_string(), SITE_EDIT_ACTION.to_string()];
        config.policy.count_per_day.insert("promo_banner_shown".to_string(), 3);
        config
    }

    fn harness_with(config: &TelemetryConfig, impersonation: Arc<dyn ImpersonationSource>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let collector = Arc::new(RecordingCollector::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 7, 8, 0, 0).unwrap(),
        ));
        let parts = DispatcherParts {
            store: store.clone(),
            markers: store.clone(),
            policies: Arc::new(StaticPolicyProvider::from_config(&config.policy)),
            collector: collector.clone(),
            impersonation,
            clock: clock.clone(),
        };
        Harness {
            store,
            collector,
            clock,
            dispatcher: EventDispatcher::new(parts, config),
        }
    }

    fn harness() -> Harness {
        harness_with(&config(), Arc::new(NoImpersonation))
    }

    #[tokio::test]
    async fn test_survey_once_per_day_end_to_end() {
        let h = harness();
        let params = EventParams::new(SURVEY).with_field("rating", 5);

        assert!(h.dispatcher.dispatch(params.clone(), &Headers::new()).await.is_delivered());
        assert_eq!(
            h.dispatcher.dispatch(params.clone(), &Headers::new()).await,
            EventResult::Skipped
        );

        h.clock.advance(Duration::from_secs(24 * 60 * 60));
        assert!(h.dispatcher.dispatch(params, &Headers::new()).await.is_delivered());
        assert_eq!(h.collector.count(), 2);
    }

    #[tokio::test]
    async fn test_promo_count_end_to_end() {
        let h = harness();
        let mut delivered = 0;
        for _ in 0..5 {
            let result = h
                .dispatcher
                .dispatch(EventParams::new("promo_banner_shown"), &Headers::new())
                .await;
            if result.is_delivered() {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 3);
        assert_eq!(h.collector.count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_event_skipped_silently() {
        let (logs, _guard) = capture_errors();
        let h = harness();

        let result = h.dispatcher.dispatch(EventParams::default(), &Headers::new()).await;
        assert_eq!(result.to_json(), json!({}));
        assert_eq!(h.collector.count(), 0);
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_marker_store_skips_event() {
        let (logs, _guard) = capture_errors();
        let h = harness();
        h.store.set_fail_markers(true);

        let result = h.dispatcher.dispatch(EventParams::new("anything"), &Headers::new()).await;
        assert_eq!(result, EventResult::Skipped);
        assert_eq!(h.collector.count(), 0);
        // Throttle markers are down too, so the reporter logs unthrottled
        assert_eq!(logs.len(), 1);

        h.store.set_fail_markers(false);
        assert!(h
            .dispatcher
            .dispatch(EventParams::new("anything"), &Headers::new())
            .await
            .is_delivered());
    }

    #[tokio::test]
    async fn test_storage_failure_is_fail_closed() {
        let h = harness();
        h.store.set_fail_writes(true);

        let result = h.dispatcher.dispatch(EventParams::new(SURVEY), &Headers::new()).await;
        assert_eq!(result, EventResult::Skipped);
        assert_eq!(h.collector.count(), 0);
    }

    #[tokio::test]
    async fn test_enrichment_reaches_collector() {
        let session = Arc::new(StaticImpersonation::new(Some(ImpersonationContext {
            acting_client_id: Some("admin-7".to_string()),
            client_id: Some("client-9".to_string()),
            expires_at: None,
        })));
        let h = harness_with(&config(), session);
        let mut headers = Headers::new();
        headers.insert(
            "X_Correlation_Id".to_string(),
            HeaderValue::from(vec!["corr-1".to_string(), "corr-2".to_string()]),
        );

        h.dispatcher.dispatch(EventParams::new("anything"), &headers).await;

        let request = &h.collector.requests()[0];
        let params = &request.body["params"];
        assert_eq!(params["siteurl"], "https://example.com/mysite/");
        assert_eq!(params["directory"], "mysite");
        assert_eq!(params["is_impersonated"], true);
        assert_eq!(params["impersonated_client_id"], "admin-7");
        assert_eq!(params["client_id"], "client-9");
        assert_eq!(
            request.headers,
            vec![("X-Correlation-ID".to_string(), "corr-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_site_edit_event() {
        // AI site without a generated version is not eligible
        let h = harness();
        assert_eq!(h.dispatcher.send_site_edit(&Headers::new()).await, EventResult::Skipped);
        assert_eq!(h.collector.count(), 0);

        let mut config = config();
        config.site.ai_version = "v2".to_string();
        let h = harness_with(&config, Arc::new(NoImpersonation));

        assert!(h.dispatcher.send_site_edit(&Headers::new()).await.is_delivered());
        assert_eq!(h.dispatcher.send_site_edit(&Headers::new()).await, EventResult::Skipped);

        let params = &h.collector.requests()[0].body["params"];
        assert_eq!(params["action"], SITE_EDIT_ACTION);
        assert_eq!(params["wp_builder_type"], "ai");
        assert_eq!(params["website_id"], "w-1");
        assert_eq!(params["subscription_id"], "s-1");
    }

    /// Dedup store whose reads panic
    struct PanickingStore;

    #[async_trait::async_trait]
    impl DedupStore for PanickingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            panic!("dedup store read panicked")
        }

        async fn try_claim(&self, _key: &str, _value: &str) -> Result<bool> {
            Ok(true)
        }

        async fn increment_and_get(&self, _key: &str) -> Result<i64> {
            Ok(1)
        }

        async fn delete_except(&self, _prefix: &str, _keep_key: &str) -> Result<u64> {
            Ok(0)
        }

        fn name(&self) -> &'static str {
            "panicking_store"
        }
    }

    #[tokio::test]
    async fn test_panic_in_gate_store_becomes_generic_error() {
        let (logs, _guard) = capture_errors();
        let config = config();
        let markers = Arc::new(MemoryStore::new());
        let collector = Arc::new(RecordingCollector::default());
        let parts = DispatcherParts {
            store: Arc::new(PanickingStore),
            markers,
            policies: Arc::new(StaticPolicyProvider::from_config(&config.policy)),
            collector: collector.clone(),
            impersonation: Arc::new(NoImpersonation),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 5, 7, 8, 0, 0).unwrap(),
            )),
        };
        let dispatcher = EventDispatcher::new(parts, &config);

        let result = dispatcher.dispatch(EventParams::new(SURVEY), &Headers::new()).await;
        assert_eq!(result, EventResult::generic_error());
        assert_eq!(collector.count(), 0);
        assert_eq!(logs.len(), 1);

        // Same signature, still inside the throttle window
        let again = dispatcher.dispatch(EventParams::new(SURVEY), &Headers::new()).await;
        assert_eq!(again, EventResult::generic_error());
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_opens_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.store.path = dir.path().join("telemetry.db").display().to_string();

        let dispatcher = EventDispatcher::from_config(&config).unwrap();
        // A blank action is rejected before any network call
        let result = dispatcher.dispatch(EventParams::new(" "), &Headers::new()).await;
        assert_eq!(result, EventResult::Skipped);
        assert!(dir.path().join("telemetry.db").exists());
    }
}
