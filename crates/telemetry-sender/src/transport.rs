//! Delivery boundary
//!
//! [`EventTransport::send`] never fails: transport errors become an empty result,
//! every other fault (panics included) becomes the generic error result. Both are
//! reported through the throttled reporter.

use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use telemetry_core::message::CORRELATION_HEADER;
use telemetry_core::metrics::{LatencyTimer, TransportMetrics};
use telemetry_core::prelude::*;
use telemetry_gate::ErrorReporter;
use tracing::{debug, warn};

use crate::enrich::Enricher;

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Enriches allowed events and hands them to the collector
pub struct EventTransport {
    enricher: Enricher,
    collector: Arc<dyn Collector>,
    reporter: Arc<ErrorReporter>,
    metrics: TransportMetrics,
}

impl EventTransport {
    pub fn new(
        enricher: Enricher,
        collector: Arc<dyn Collector>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            enricher,
            collector,
            reporter,
            metrics: TransportMetrics::new("transport"),
        }
    }

    /// Enrich and deliver one event
    pub async fn send(&self, params: EventParams, headers: &Headers) -> EventResult {
        let outcome = AssertUnwindSafe(self.try_send(params, headers))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(TelemetryError::Internal(format!(
                    "Send panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match outcome {
            Ok(body) => {
                self.metrics.record_send("delivered");
                EventResult::Delivered(body)
            }
            Err(e) if e.kind() == ErrorKind::Validation => {
                debug!(error = %e, "Event not sent");
                EventResult::Skipped
            }
            Err(e) if e.kind() == ErrorKind::Transport => {
                let code = e.code().unwrap_or("unknown").to_string();
                warn!(code = %code, error = %e, "Event delivery failed");
                self.metrics.record_send("transport_error");
                self.reporter
                    .log_throttled(
                        &format!("Telemetry request failed: {}", e),
                        &format!("wp_error_{}", code),
                    )
                    .await;
                EventResult::Skipped
            }
            Err(e) => {
                self.metrics.record_send("error");
                self.reporter
                    .log_throttled(
                        &format!("Telemetry send raised {} error: {}", e.kind(), e),
                        &format!("exception_{}", e.kind()),
                    )
                    .await;
                EventResult::generic_error()
            }
        }
    }

    async fn try_send(&self, params: EventParams, headers: &Headers) -> Result<Value> {
        let action = telemetry_gate::action_of(&params)?;
        let envelope = self.enricher.enrich(action, params.into_fields(), headers);

        let mut extra = Vec::new();
        if let Some(ref id) = envelope.correlation_id {
            extra.push((CORRELATION_HEADER.to_string(), id.clone()));
        }
        let request = CollectorRequest {
            body: envelope.to_body(),
            headers: extra,
        };

        let metrics = self.metrics.clone();
        let timer = LatencyTimer::start(move |elapsed| metrics.record_send_latency(elapsed));
        let body = self.collector.send(request).await?;
        let elapsed = timer.stop();

        debug!(
            action = %envelope.action,
            collector = self.collector.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Event delivered"
        );
        Ok(body)
    }
}
