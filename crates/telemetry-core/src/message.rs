//! Message types for the telemetry gate
//!
//! Defines the inbound event parameters, the enriched outbound envelope, and the
//! result value handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Generic message of the error result
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while sending the request.";

/// Header carrying the correlation id to the collector
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Caller-supplied event: an action plus arbitrary fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventParams {
    fields: Map<String, Value>,
}

impl EventParams {
    /// Create params for an action
    pub fn new(action: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("action".to_string(), Value::String(action.into()));
        Self { fields }
    }

    /// Wrap an arbitrary field map (the action may be missing)
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder pattern: add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Raw action field, if it is a string
    pub fn action(&self) -> Option<&str> {
        self.fields.get("action").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// Value of an inbound header: single or multi-valued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    /// Single value, or the first of a multi-valued header
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::Multi(values) => values.first().map(String::as_str),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

/// Inbound request headers, keyed as received
pub type Headers = HashMap<String, HeaderValue>;

/// Session data recorded when an administrator acts on behalf of a client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acting_client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Instant after which the context no longer applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ImpersonationContext {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Outbound event after enrichment
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Sanitized action identifier
    pub action: String,
    /// Caller-supplied fields, `action` included
    pub fields: Map<String, Value>,
    pub siteurl: Option<String>,
    pub directory: Option<String>,
    /// Sent as a header, never in the body
    pub correlation_id: Option<String>,
    pub is_impersonated: bool,
    pub impersonated_client_id: Option<String>,
    pub client_id: Option<String>,
}

impl EventEnvelope {
    /// Envelope carrying only the caller's fields
    pub fn new(action: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            fields,
            siteurl: None,
            directory: None,
            correlation_id: None,
            is_impersonated: false,
            impersonated_client_id: None,
            client_id: None,
        }
    }

    /// Body parameters sent to the collector
    ///
    /// Enrichment keys overwrite caller fields of the same name.
    pub fn to_params(&self) -> Map<String, Value> {
        let mut params = self.fields.clone();
        params.insert("action".to_string(), Value::String(self.action.clone()));

        if let Some(ref url) = self.siteurl {
            params.insert("siteurl".to_string(), Value::String(url.clone()));
        }
        if let Some(ref dir) = self.directory {
            params.insert("directory".to_string(), Value::String(dir.clone()));
        }
        if self.is_impersonated {
            params.insert("is_impersonated".to_string(), Value::Bool(true));
        }
        if let Some(ref id) = self.impersonated_client_id {
            params.insert("impersonated_client_id".to_string(), Value::String(id.clone()));
        }
        if let Some(ref id) = self.client_id {
            params.insert("client_id".to_string(), Value::String(id.clone()));
        }

        params
    }

    /// Request body: `{"params": {...}}`
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("params".to_string(), Value::Object(self.to_params()));
        Value::Object(body)
    }
}

/// Outcome handed back to the caller; never an error
#[derive(Debug, Clone, PartialEq)]
pub enum EventResult {
    /// Not sent (denied, invalid, or transport failure)
    Skipped,
    /// Collector response body
    Delivered(Value),
    /// Unexpected fault, reported generically
    Error { message: String },
}

impl EventResult {
    pub fn generic_error() -> Self {
        Self::Error {
            message: GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Wire shape: `{}`, the response body, or `{"status":"error","message":...}`
    pub fn to_json(&self) -> Value {
        match self {
            Self::Skipped => Value::Object(Map::new()),
            Self::Delivered(body) => body.clone(),
            Self::Error { message } => serde_json::json!({
                "status": "error",
                "message": message,
            }),
        }
    }
}

impl Serialize for EventResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
