//! # Telemetry Store
//!
//! Backing stores for the event telemetry gate.
//!
//! ## Stores
//!
//! - `SqliteStore`: shared on-disk store, safe across processes
//! - `MemoryStore`: single-process store with fault injection
//! - `FailingStore`: every operation fails

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::*;
pub use sqlite::*;
