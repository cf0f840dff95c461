//! # Telemetry Gate
//!
//! Decides whether an outbound telemetry event may be sent today.
//!
//! ## Components
//!
//! - `EventGate`: resolves the action's policy and consults the dedup store
//! - `CleanupScheduler`: sweeps stale per-day entries, at most once per interval
//! - `ErrorReporter`: the single, throttled path to the operator log
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = Arc::new(SqliteStore::open(&config.store)?);
//! let gate = EventGate::from_parts(store.clone(), store, policies, clock, &config.limits);
//!
//! if gate.evaluate(&EventParams::new("promo_banner_shown")).await {
//!     // send
//! }
//! ```

pub mod cleanup;
pub mod gate;
pub mod reporter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cleanup::*;
pub use gate::*;
pub use reporter::*;
