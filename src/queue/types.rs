//! Queue record types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current schema version stamped into `schema_meta`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// HTTP verb of a queued server write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a verb case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which downstream collaborator consumes a queued write.
///
/// Persisted as the short server tags `registration`, `response` and `wcp`.
/// Tags written by other versions are kept verbatim as
/// [`DestinationKind::Unrecognized`] so they are never silently rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationKind {
    RegistrationPreferenceUpdate,
    ResponseProcessing,
    ReservedUnused,
    Unrecognized(String),
}

impl DestinationKind {
    /// Persisted tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RegistrationPreferenceUpdate => "registration",
            Self::ResponseProcessing => "response",
            Self::ReservedUnused => "wcp",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Parse a persisted tag or its long form. Never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "registration" | "registration-preference-update" => {
                Self::RegistrationPreferenceUpdate
            }
            "response" | "response-processing" => Self::ResponseProcessing,
            "wcp" | "reserved-unused" => Self::ReservedUnused,
            _ => Self::Unrecognized(raw.to_owned()),
        }
    }
}

impl Serialize for DestinationKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DestinationKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One server write that could not be confirmed when it was made.
///
/// `json_payload` is kept as raw text: the queue never validates it, and a
/// payload that fails to parse is only detected when the entry is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub http_method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub normal_params: Vec<(String, String)>,
    #[serde(default = "empty_object")]
    pub json_payload: String,
    pub destination_kind: DestinationKind,
}

fn empty_object() -> String {
    "{}".to_owned()
}

impl PendingOperation {
    /// Build an operation with a JSON body and no form parameters.
    #[must_use]
    pub fn new(
        http_method: HttpMethod,
        url: impl Into<String>,
        payload: &serde_json::Value,
        destination_kind: DestinationKind,
    ) -> Self {
        Self {
            http_method,
            url: url.into(),
            normal_params: Vec::new(),
            json_payload: payload.to_string(),
            destination_kind,
        }
    }

    /// Append a form parameter, keeping insertion order.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.normal_params.push((key.into(), value.into()));
        self
    }

    /// Replace the body with raw text, bypassing JSON encoding.
    #[must_use]
    pub fn with_raw_payload(mut self, raw: impl Into<String>) -> Self {
        self.json_payload = raw.into();
        self
    }
}

/// A [`PendingOperation`] as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    /// Insertion sequence number. Strictly increasing, never reused.
    pub seq: i64,
    /// Unix seconds when the entry was enqueued.
    pub enqueued_at: u64,
    pub op: PendingOperation,
}

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
