//! # Telemetry Core
//!
//! Core types, strategy traits, and utilities for the event telemetry gate.
//!
//! The gate decides whether an outbound analytics event may be sent today under
//! per-action policies, using a shared persistent store as the only source of
//! truth across concurrent, stateless callers.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► EventDispatcher ──► EventGate ──► DedupStore
//!                 │                  │
//!                 │                  └──► CleanupScheduler ──► DedupStore
//!                 │
//!                 └──► EventTransport ──► Collector ──► remote endpoint
//!
//!          ErrorReporter ◄── every component on failure (MarkerStore-throttled)
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod message;
pub mod metrics;
pub mod policy;
pub mod sanitize;
pub mod strategy;

pub use self::clock::*;
pub use self::config::*;
pub use self::error::*;
pub use self::key::*;
pub use self::message::*;
pub use self::metrics::*;
pub use self::policy::*;
pub use self::sanitize::*;
pub use self::strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::TelemetryConfig;
    pub use crate::error::{ErrorKind, Result, TelemetryError};
    pub use crate::key::{DedupKey, KeyPrefix};
    pub use crate::message::{EventEnvelope, EventParams, EventResult, HeaderValue, Headers};
    pub use crate::policy::{EventPolicy, PolicyProvider};
    pub use crate::strategy::{
        Collector, CollectorRequest, DedupStore, ImpersonationSource, MarkerStore,
    };
}
