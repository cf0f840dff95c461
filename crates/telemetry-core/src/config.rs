//! Configuration types for the telemetry gate
//!
//! Uses the `config` crate for layered configuration from files and environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Result, TelemetryError};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Dedup/marker store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Remote collector configuration
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Site identity
    #[serde(default)]
    pub site: SiteConfig,

    /// Per-action rate policies
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Marker lifetimes
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Store Configuration
// ============================================================================

/// SQLite store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file shared by every process that sends events
    #[serde(default = "default_store_path")]
    pub path: String,

    /// How long a statement waits on a locked database
    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    pub busy_timeout: Duration,
}

fn default_store_path() -> String {
    "/var/lib/event-telemetry/telemetry.db".to_string()
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

// ============================================================================
// Collector Configuration
// ============================================================================

/// Remote collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Collector base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path appended to the base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Optional API token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Header carrying the API token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Optional domain reported alongside the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Header carrying the domain
    #[serde(default = "default_domain_header")]
    pub domain_header: String,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_endpoint() -> String {
    "/v3/wordpress/plugin/trigger-event".to_string()
}

fn default_token_header() -> String {
    "X-Api-Token".to_string()
}

fn default_domain_header() -> String {
    "X-Site-Domain".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            api_token: None,
            token_header: default_token_header(),
            domain: None,
            domain_header: default_domain_header(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl CollectorConfig {
    /// Full URL events are posted to
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoint)
    }
}

// ============================================================================
// Site Configuration
// ============================================================================

/// Identity of the site events are reported for
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site root URL, e.g. `https://example.com/mysite/`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Offset from UTC of the site's calendar day, in minutes
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default)]
    pub builder_type: String,

    #[serde(default)]
    pub website_id: String,

    #[serde(default)]
    pub subscription_id: String,

    #[serde(default)]
    pub ai_version: String,
}

// ============================================================================
// Policy Configuration
// ============================================================================

/// Static per-action policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Actions sent at most once per calendar day
    #[serde(default)]
    pub once_per_day: Vec<String>,

    /// Actions sent at most `max` times per calendar day
    #[serde(default)]
    pub count_per_day: HashMap<String, i64>,
}

// ============================================================================
// Limits Configuration
// ============================================================================

/// Marker lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Minimum spacing between cleanup sweeps of one action
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,

    /// Window during which an identical failure is logged once
    #[serde(with = "humantime_serde", default = "default_error_throttle")]
    pub error_throttle: Duration,

    /// How long a successful store probe is trusted
    #[serde(with = "humantime_serde", default = "default_eligibility_interval")]
    pub eligibility_interval: Duration,
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_error_throttle() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_eligibility_interval() -> Duration {
    Duration::from_secs(3 * 60 * 60)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
            error_throttle: default_error_throttle(),
            eligibility_interval: default_eligibility_interval(),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl TelemetryConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with prefix TELEMETRY_, e.g. TELEMETRY_STORE__PATH
        builder = builder.add_source(
            config::Environment::with_prefix("TELEMETRY")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.collector.base_url.trim().is_empty() {
            return Err(TelemetryError::config("collector.base_url must not be empty"));
        }
        if self.store.path.trim().is_empty() {
            return Err(TelemetryError::config("store.path must not be empty"));
        }

        let limits = [
            ("limits.cleanup_interval", self.limits.cleanup_interval),
            ("limits.error_throttle", self.limits.error_throttle),
            ("limits.eligibility_interval", self.limits.eligibility_interval),
        ];
        for (name, ttl) in limits {
            if ttl.is_zero() {
                return Err(TelemetryError::config(format!("{} must be positive", name)));
            }
        }

        Ok(())
    }
}
