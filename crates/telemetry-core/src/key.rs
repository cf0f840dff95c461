//! Store key derivation
//!
//! Every key the pipeline writes is derived here so that the dedup keys a sweep
//! deletes and the keys a claim creates can never drift apart.
//!
//! ```text
//! telemetry_event_<action>_<YYYY-MM-DD>      once-per-day claim
//! telemetry_count_<action>_<YYYY-MM-DD>      count-per-day counter
//! telemetry_cleanup_<prefix><action>         cleanup marker (1h)
//! telemetry_error_<sha256(signature)>        error throttle marker (5m)
//! ```

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::fmt;

/// Namespace of a day-scoped dedup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPrefix {
    /// Presence flag for once-per-day actions
    Once,
    /// Counter for count-per-day actions
    Count,
}

impl KeyPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "telemetry_event_",
            Self::Count => "telemetry_count_",
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one action's claim or counter for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    prefix: KeyPrefix,
    action: String,
    date: NaiveDate,
}

impl DedupKey {
    pub fn new(prefix: KeyPrefix, action: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            prefix,
            action: action.into(),
            date,
        }
    }

    pub fn prefix(&self) -> KeyPrefix {
        self.prefix
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Prefix shared by this action's keys on every day
    ///
    /// Longer action names can extend it (`promo_` is a prefix of
    /// `promo_banner_`), so only `family()` followed by exactly a date belongs
    /// to this action. See [`is_dated_key`].
    pub fn family(&self) -> String {
        format!("{}{}_", self.prefix.as_str(), self.action)
    }

    pub fn as_string(&self) -> String {
        format!("{}{}", self.family(), self.date.format("%Y-%m-%d"))
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Length of the `YYYY-MM-DD` suffix
pub const DATE_SUFFIX_LEN: usize = 10;

/// True when `key` is `family` followed by a `YYYY-MM-DD` date and nothing else
///
/// Matches the same shape as the SQL `GLOB` used by the SQLite sweep.
pub fn is_dated_key(family: &str, key: &str) -> bool {
    let Some(suffix) = key.strip_prefix(family) else {
        return false;
    };
    suffix.len() == DATE_SUFFIX_LEN
        && suffix.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        })
}

const CLEANUP_MARKER_PREFIX: &str = "telemetry_cleanup_";
const ERROR_MARKER_PREFIX: &str = "telemetry_error_";

/// Marker guarding the cleanup sweep of one `{prefix, action}`
pub fn cleanup_marker_key(prefix: KeyPrefix, action: &str) -> String {
    format!("{}{}{}", CLEANUP_MARKER_PREFIX, prefix.as_str(), action)
}

/// Marker suppressing repeats of one failure signature
pub fn error_marker_key(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    format!("{}{}", ERROR_MARKER_PREFIX, hex::encode(digest))
}
