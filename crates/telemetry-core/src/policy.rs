//! Per-action send policies
//!
//! Policies are resolved on every evaluation from a [`PolicyProvider`]; nothing is
//! cached between calls, so a provider may change its answer at any time.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::PolicyConfig;

/// How often an action may be sent per calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPolicy {
    /// No limit, no store access
    Unbounded,
    /// At most one send per day
    OncePerDay,
    /// At most `max` sends per day
    CountPerDay { max: i64 },
}

impl EventPolicy {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unbounded => "unbounded",
            Self::OncePerDay => "once_per_day",
            Self::CountPerDay { .. } => "count_per_day",
        }
    }

    /// Resolve the policy of `action` from the two provider collections
    ///
    /// Once-per-day membership wins over a count entry for the same action.
    pub fn resolve(
        action: &str,
        once_per_day: &HashSet<String>,
        count_per_day: &HashMap<String, i64>,
    ) -> Self {
        if once_per_day.contains(action) {
            return Self::OncePerDay;
        }
        match count_per_day.get(action) {
            Some(max) => Self::CountPerDay { max: *max },
            None => Self::Unbounded,
        }
    }
}

/// Source of the action classifications
pub trait PolicyProvider: Send + Sync {
    /// Actions classified once-per-day
    fn once_per_day(&self) -> HashSet<String>;

    /// Actions classified count-per-day, with their daily maximum
    fn count_per_day(&self) -> HashMap<String, i64>;

    /// Resolve one action
    fn policy_for(&self, action: &str) -> EventPolicy {
        EventPolicy::resolve(action, &self.once_per_day(), &self.count_per_day())
    }
}

/// Provider backed by in-process collections that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticPolicyProvider {
    once_per_day: RwLock<HashSet<String>>,
    count_per_day: RwLock<HashMap<String, i64>>,
}

impl StaticPolicyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            once_per_day: RwLock::new(config.once_per_day.iter().cloned().collect()),
            count_per_day: RwLock::new(config.count_per_day.clone()),
        }
    }

    /// Builder: classify an action once-per-day
    pub fn with_once_per_day(self, action: impl Into<String>) -> Self {
        self.once_per_day.write().insert(action.into());
        self
    }

    /// Builder: classify an action count-per-day
    pub fn with_count_per_day(self, action: impl Into<String>, max: i64) -> Self {
        self.count_per_day.write().insert(action.into(), max);
        self
    }

    /// Replace both collections
    pub fn replace(&self, config: &PolicyConfig) {
        *self.once_per_day.write() = config.once_per_day.iter().cloned().collect();
        *self.count_per_day.write() = config.count_per_day.clone();
    }
}

impl PolicyProvider for StaticPolicyProvider {
    fn once_per_day(&self) -> HashSet<String> {
        self.once_per_day.read().clone()
    }

    fn count_per_day(&self) -> HashMap<String, i64> {
        self.count_per_day.read().clone()
    }

    fn policy_for(&self, action: &str) -> EventPolicy {
        if self.once_per_day.read().contains(action) {
            return EventPolicy::OncePerDay;
        }
        match self.count_per_day.read().get(action) {
            Some(max) => EventPolicy::CountPerDay { max: *max },
            None => EventPolicy::Unbounded,
        }
    }
}
