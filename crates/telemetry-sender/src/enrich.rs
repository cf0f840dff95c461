//! Context attached to an event before it leaves the process

use serde_json::{Map, Value};
use std::sync::Arc;
use telemetry_core::prelude::*;
use telemetry_core::sanitize::sanitize_text;
use url::Url;

/// Path of `site_url` without leading or trailing slashes
///
/// `https://example.com/mysite/` gives `mysite`; a root or unparsable URL gives
/// an empty string.
pub fn directory_for(site_url: &str) -> String {
    Url::parse(site_url)
        .map(|url| url.path().trim_matches('/').to_string())
        .unwrap_or_default()
}

fn is_correlation_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("x-correlation-id") || name.eq_ignore_ascii_case("x_correlation_id")
}

/// Sanitized correlation id from inbound headers
///
/// Header names match case-insensitively with either `-` or `_` separators; a
/// multi-valued header contributes its first value.
pub fn extract_correlation_id(headers: &Headers) -> Option<String> {
    headers
        .iter()
        .filter(|(name, _)| is_correlation_header(name))
        .min_by(|a, b| a.0.cmp(b.0))
        .and_then(|(_, value)| value.first())
        .map(sanitize_text)
        .filter(|id| !id.is_empty())
}

fn sanitized(value: Option<&String>) -> Option<String> {
    value.map(|v| sanitize_text(v)).filter(|v| !v.is_empty())
}

/// Builds envelopes from caller fields plus site, request and session context
pub struct Enricher {
    site_url: Option<String>,
    impersonation: Arc<dyn ImpersonationSource>,
    clock: Arc<dyn Clock>,
}

impl Enricher {
    pub fn new(
        site_url: Option<String>,
        impersonation: Arc<dyn ImpersonationSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            site_url: site_url.filter(|url| !url.trim().is_empty()),
            impersonation,
            clock,
        }
    }

    pub fn enrich(
        &self,
        action: impl Into<String>,
        fields: Map<String, Value>,
        headers: &Headers,
    ) -> EventEnvelope {
        let mut envelope = EventEnvelope::new(action, fields);

        if let Some(ref url) = self.site_url {
            envelope.directory = Some(directory_for(url));
            envelope.siteurl = Some(url.clone());
        }

        envelope.correlation_id = extract_correlation_id(headers);

        if let Some(context) = self.impersonation.current() {
            if !context.is_expired(self.clock.now()) {
                if let Some(acting) = sanitized(context.acting_client_id.as_ref()) {
                    envelope.is_impersonated = true;
                    envelope.impersonated_client_id = Some(acting);
                }
                envelope.client_id = sanitized(context.client_id.as_ref());
            }
        }

        envelope
    }
}
