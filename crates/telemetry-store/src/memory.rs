//! In-memory stores for tests and embedding
//!
//! `MemoryStore` holds all state behind one mutex, which gives the same
//! atomicity as the SQL statements within a single process. Fault toggles let
//! tests drive the fail-closed branches of the gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry_core::key::is_dated_key;
use telemetry_core::prelude::*;

// ============================================================================
// Memory Store
// ============================================================================

#[derive(Default)]
struct State {
    entries: HashMap<String, String>,
    markers: HashMap<String, DateTime<Utc>>,
}

/// Injected failures, toggled at runtime
#[derive(Debug, Default)]
pub struct Faults {
    /// `get` fails
    pub reads: AtomicBool,
    /// `try_claim` and `increment_and_get` fail
    pub writes: AtomicBool,
    /// `delete_except` fails
    pub deletes: AtomicBool,
    /// every marker operation fails
    pub markers: AtomicBool,
    /// `try_claim` reports a lost race without writing anything
    pub drop_claims: AtomicBool,
}

impl Faults {
    fn check(flag: &AtomicBool, op: &str, key: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(TelemetryError::storage(format!(
                "Injected failure: {} {}",
                op, key
            )));
        }
        Ok(())
    }
}

/// In-memory dedup + marker store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Faults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault toggles
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub fn set_fail_reads(&self, on: bool) {
        self.faults.reads.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, on: bool) {
        self.faults.writes.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, on: bool) {
        self.faults.deletes.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_markers(&self, on: bool) {
        self.faults.markers.store(on, Ordering::SeqCst);
    }

    pub fn set_drop_claims(&self, on: bool) {
        self.faults.drop_claims.store(on, Ordering::SeqCst);
    }

    /// Sorted snapshot of dedup keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Seed a dedup entry directly
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().entries.insert(key.into(), value.into());
    }

    /// Number of stored markers, expired ones included
    pub fn marker_count(&self) -> usize {
        self.state.lock().markers.len()
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Faults::check(&self.faults.reads, "get", key)?;
        Ok(self.state.lock().entries.get(key).cloned())
    }

    async fn try_claim(&self, key: &str, value: &str) -> Result<bool> {
        Faults::check(&self.faults.writes, "claim", key)?;
        if self.faults.drop_claims.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let mut state = self.state.lock();
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn increment_and_get(&self, key: &str) -> Result<i64> {
        Faults::check(&self.faults.writes, "increment", key)?;

        let mut state = self.state.lock();
        let entry = state.entries.entry(key.to_string()).or_insert_with(|| "0".to_string());
        // Non-numeric values count as zero, like CAST in SQLite
        let next = entry.trim().parse::<i64>().unwrap_or(0).saturating_add(1);
        *entry = next.to_string();
        Ok(next)
    }

    async fn delete_except(&self, prefix: &str, keep_key: &str) -> Result<u64> {
        Faults::check(&self.faults.deletes, "delete", prefix)?;

        let mut state = self.state.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|key, _| key == keep_key || !is_dated_key(prefix, key));
        Ok((before - state.entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory_store"
    }
}

#[async_trait]
impl MarkerStore for MemoryStore {
    async fn has_marker(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Faults::check(&self.faults.markers, "has_marker", key)?;
        Ok(self
            .state
            .lock()
            .markers
            .get(key)
            .map(|expires| *expires > now)
            .unwrap_or(false))
    }

    async fn try_mark(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        Faults::check(&self.faults.markers, "try_mark", key)?;

        let expires = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = self.state.lock();
        match state.markers.get(key) {
            Some(current) if *current > now => Ok(false),
            _ => {
                state.markers.insert(key.to_string(), expires);
                Ok(true)
            }
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Faults::check(&self.faults.markers, "purge", "markers")?;

        let mut state = self.state.lock();
        let before = state.markers.len();
        state.markers.retain(|_, expires| *expires > now);
        Ok((before - state.markers.len()) as u64)
    }
}

// ============================================================================
// Failing Store
// ============================================================================

/// Store whose every operation fails
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl FailingStore {
    fn fail<T>(op: &str) -> Result<T> {
        Err(TelemetryError::storage(format!("Store unavailable: {}", op)))
    }
}

#[async_trait]
impl DedupStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Self::fail("get")
    }

    async fn try_claim(&self, _key: &str, _value: &str) -> Result<bool> {
        Self::fail("claim")
    }

    async fn increment_and_get(&self, _key: &str) -> Result<i64> {
        Self::fail("increment")
    }

    async fn delete_except(&self, _prefix: &str, _keep_key: &str) -> Result<u64> {
        Self::fail("delete")
    }

    fn name(&self) -> &'static str {
        "failing_store"
    }
}

#[async_trait]
impl MarkerStore for FailingStore {
    async fn has_marker(&self, _key: &str, _now: DateTime<Utc>) -> Result<bool> {
        Self::fail("has_marker")
    }

    async fn try_mark(&self, _key: &str, _now: DateTime<Utc>, _ttl: Duration) -> Result<bool> {
        Self::fail("try_mark")
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Self::fail("purge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_memory_claim_and_increment() {
        let store = MemoryStore::new();

        assert!(store.try_claim("k", "1").await.unwrap());
        assert!(!store.try_claim("k", "2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("1".to_string()));

        assert_eq!(store.increment_and_get("c").await.unwrap(), 1);
        assert_eq!(store.increment_and_get("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_delete_except() {
        let store = MemoryStore::new();
        store.insert("telemetry_event_a_2024-05-06", "1");
        store.insert("telemetry_event_a_2024-05-07", "1");
        store.insert("telemetry_event_ab_2024-05-06", "1");
        store.insert("telemetry_event_a_b_2024-05-06", "1");
        store.insert("telemetry_event_a_b_2024-05-07", "1");

        let deleted = store
            .delete_except("telemetry_event_a_", "telemetry_event_a_2024-05-07")
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(
            store.keys(),
            vec![
                "telemetry_event_a_2024-05-07".to_string(),
                "telemetry_event_a_b_2024-05-06".to_string(),
                "telemetry_event_a_b_2024-05-07".to_string(),
                "telemetry_event_ab_2024-05-06".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_markers_expire() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.try_mark("m", t0(), ttl).await.unwrap());
        assert!(!store.try_mark("m", t0(), ttl).await.unwrap());
        assert!(store.has_marker("m", t0()).await.unwrap());

        let later = t0() + chrono::Duration::seconds(60);
        assert!(!store.has_marker("m", later).await.unwrap());
        assert_eq!(store.purge_expired(later).await.unwrap(), 1);
        assert_eq!(store.marker_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();

        store.set_fail_writes(true);
        let err = store.try_claim("k", "1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        store.set_fail_writes(false);

        store.set_drop_claims(true);
        assert!(!store.try_claim("k", "1").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set_drop_claims(false);

        store.set_fail_markers(true);
        assert!(store.has_marker("m", t0()).await.is_err());

        assert!(FailingStore.get("k").await.is_err());
        assert!(FailingStore.try_mark("m", t0(), Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_concurrent_claims() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_claim("once", "now").await.unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
