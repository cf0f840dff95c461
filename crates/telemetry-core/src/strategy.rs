//! Strategy Pattern Traits for the telemetry gate
//!
//! Each external collaborator of the pipeline is a trait so that the engine never
//! touches ambient global state: stores, the collector and session data are all
//! injected.
//!
//! ## Strategy Hierarchy
//!
//! ```text
//! DedupStore   (day-scoped claims and counters)
//!     └── SqliteStore, MemoryStore
//!
//! MarkerStore  (TTL-scoped flags: cleanup + error throttle + eligibility)
//!     └── SqliteStore, MemoryStore
//!
//! Collector    (remote event endpoint)
//!     └── HttpCollector, RecordingCollector
//!
//! ImpersonationSource (session data)
//!     └── NoImpersonation, StaticImpersonation
//! ```
//!
//! ## Atomicity
//!
//! `try_claim`, `increment_and_get` and `try_mark` must each be a single atomic
//! operation at the storage layer. Callers run in independent processes with no
//! shared memory; emulating these with a read followed by a write reintroduces the
//! race the gate exists to close.

use crate::error::Result;
use crate::message::ImpersonationContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;

// ============================================================================
// Store Strategies
// ============================================================================

/// Persistent key-value primitives backing the dedup decisions
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Non-atomic read, used only as a fast-path hint
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Create `key` if absent; true iff this call performed the creation
    async fn try_claim(&self, key: &str, value: &str) -> Result<bool>;

    /// Upsert-increment starting at 1; returns the new value
    async fn increment_and_get(&self, key: &str) -> Result<i64>;

    /// Delete every `prefix` + `YYYY-MM-DD` key except `keep_key`
    ///
    /// Keys where `prefix` is followed by anything other than exactly a date
    /// belong to longer action names and are kept.
    async fn delete_except(&self, prefix: &str, keep_key: &str) -> Result<u64>;

    /// Store name for logs
    fn name(&self) -> &'static str;
}

/// TTL-scoped flags
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// True if an unexpired marker exists for `key`
    async fn has_marker(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Set the marker if absent or expired; true iff this call set it
    async fn try_mark(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool>;

    /// Drop markers that expired at or before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

// ============================================================================
// Collector Strategy
// ============================================================================

/// One outbound call to the remote collector
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorRequest {
    /// JSON body
    pub body: Value,
    /// Extra request headers, e.g. the correlation id
    pub headers: Vec<(String, String)>,
}

/// Remote event collector
#[async_trait]
pub trait Collector: Send + Sync {
    /// Send one event; returns the decoded response body
    ///
    /// Network and HTTP status failures are `TelemetryError::Transport` with a
    /// stable code.
    async fn send(&self, request: CollectorRequest) -> Result<Value>;

    /// Collector name for logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// Session Strategy
// ============================================================================

/// Source of the current impersonation context
pub trait ImpersonationSource: Send + Sync {
    fn current(&self) -> Option<ImpersonationContext>;
}

/// No impersonation ever present
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImpersonation;

impl ImpersonationSource for NoImpersonation {
    fn current(&self) -> Option<ImpersonationContext> {
        None
    }
}

/// Impersonation context set by the host
#[derive(Debug, Default)]
pub struct StaticImpersonation {
    context: RwLock<Option<ImpersonationContext>>,
}

impl StaticImpersonation {
    pub fn new(context: Option<ImpersonationContext>) -> Self {
        Self {
            context: RwLock::new(context),
        }
    }

    pub fn set(&self, context: Option<ImpersonationContext>) {
        *self.context.write() = context;
    }
}

impl ImpersonationSource for StaticImpersonation {
    fn current(&self) -> Option<ImpersonationContext> {
        self.context.read().clone()
    }
}
