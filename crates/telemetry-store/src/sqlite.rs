//! SQLite-backed dedup and marker store
//!
//! Every primitive is one SQL statement, so the guarantees hold across any number
//! of processes opening the same database file:
//!
//! - `try_claim`: `INSERT OR IGNORE` on the primary key
//! - `increment_and_get`: `INSERT .. ON CONFLICT DO UPDATE .. RETURNING`
//! - `try_mark`: upsert that only overwrites an expired marker
//!
//! The connection mutex only serializes use of the handle within one process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_core::config::StoreConfig;
use telemetry_core::prelude::*;
use tracing::{debug, info};

use crate::schema;

/// SQLite dedup + marker store
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the store described by configuration
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_path(&config.path, config.busy_timeout)
    }

    /// Open or create a store at `path`
    pub fn open_path(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening telemetry store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TelemetryError::storage_with_source("Failed to create store directory", e)
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| TelemetryError::storage_with_source("Failed to open SQLite", e))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| TelemetryError::storage_with_source("Failed to set busy timeout", e))?;

        // WAL lets readers proceed while another process writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TelemetryError::storage_with_source("Failed to set PRAGMA", e))?;

        schema::init_schema(&conn)
            .map_err(|e| TelemetryError::storage_with_source("Failed to init schema", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TelemetryError::storage_with_source("Failed to open in-memory SQLite", e)
        })?;

        schema::init_schema(&conn)
            .map_err(|e| TelemetryError::storage_with_source("Failed to init schema", e))?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn expiry_millis(now: DateTime<Utc>, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_add(ttl_ms)
}

#[async_trait]
impl DedupStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM dedup_entries WHERE key = ?1 LIMIT 1",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| TelemetryError::storage_with_source(format!("Failed to read {}", key), e))
    }

    async fn try_claim(&self, key: &str, value: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO dedup_entries (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(|e| {
                TelemetryError::storage_with_source(format!("Failed to claim {}", key), e)
            })?;

        debug!(key, claimed = inserted > 0, "Claim attempted");
        Ok(inserted > 0)
    }

    async fn increment_and_get(&self, key: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "INSERT INTO dedup_entries (key, value) VALUES (?1, '1')
             ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1
             RETURNING CAST(value AS INTEGER)",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .map_err(|e| {
            TelemetryError::storage_with_source(format!("Failed to increment {}", key), e)
        })
    }

    async fn delete_except(&self, prefix: &str, keep_key: &str) -> Result<u64> {
        let conn = self.conn.lock();
        // substr comparison is exact; LIKE would need escaping and is case-insensitive.
        // The date check keeps actions whose names extend this one out of the sweep.
        let deleted = conn
            .execute(
                "DELETE FROM dedup_entries
                 WHERE substr(key, 1, length(?1)) = ?1
                 AND length(key) = length(?1) + 10
                 AND substr(key, length(?1) + 1)
                     GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'
                 AND key != ?2",
                rusqlite::params![prefix, keep_key],
            )
            .map_err(|e| {
                TelemetryError::storage_with_source(format!("Failed to clean up {}*", prefix), e)
            })?;

        debug!(prefix, keep_key, deleted, "Deleted stale entries");
        Ok(deleted as u64)
    }

    fn name(&self) -> &'static str {
        "sqlite_store"
    }
}

#[async_trait]
impl MarkerStore for SqliteStore {
    async fn has_marker(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM markers WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now.timestamp_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| {
                TelemetryError::storage_with_source(format!("Failed to read marker {}", key), e)
            })?;
        Ok(found.is_some())
    }

    async fn try_mark(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "INSERT INTO markers (key, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
                 WHERE markers.expires_at <= ?3",
                rusqlite::params![key, expiry_millis(now, ttl), now.timestamp_millis()],
            )
            .map_err(|e| {
                TelemetryError::storage_with_source(format!("Failed to set marker {}", key), e)
            })?;
        Ok(changed > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM markers WHERE expires_at <= ?1",
                rusqlite::params![now.timestamp_millis()],
            )
            .map_err(|e| TelemetryError::storage_with_source("Failed to purge markers", e))?;
        Ok(removed as u64)
    }
}
