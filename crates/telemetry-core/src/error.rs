//! Error types for the telemetry gate
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.
//! Every variant maps onto one of four [`ErrorKind`]s; callers branch on the kind,
//! never on the concrete variant.

use std::fmt;
use thiserror::Error;

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Coarse failure classification used for fail-closed decisions and result shaping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed caller input; silently dropped
    Validation,
    /// Backing store fault; the gate denies
    Storage,
    /// Remote collector fault; swallowed into an empty result
    Transport,
    /// Anything else; converted into a generic error result
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Transport => "transport",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type for all telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Missing or empty event fields
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Dedup/marker store errors
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote collector errors
    #[error("Transport error [{code}]: {message}")]
    Transport {
        code: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Payload serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TelemetryError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error identified by a stable code
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        code: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            code: code.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify into the four-way taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Configuration { .. } | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::Unexpected
            }
        }
    }

    /// Errors that must turn an allow decision into a deny
    pub fn is_fail_closed(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::Validation)
    }

    /// Transport error code, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transport { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
