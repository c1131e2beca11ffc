//! Versioned command/event envelopes exchanged with the host shell.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Commands a host shell can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "task.start_timed")]
    TaskStartTimed,
    #[serde(rename = "task.start_sync")]
    TaskStartSync,
    #[serde(rename = "task.alarm_fired")]
    TaskAlarmFired,
    #[serde(rename = "task.stop")]
    TaskStop,
    #[serde(rename = "task.status")]
    TaskStatus,
    #[serde(rename = "queue.enqueue")]
    QueueEnqueue,
    #[serde(rename = "queue.status")]
    QueueStatus,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::TaskStartTimed => "task.start_timed",
            Self::TaskStartSync => "task.start_sync",
            Self::TaskAlarmFired => "task.alarm_fired",
            Self::TaskStop => "task.stop",
            Self::TaskStatus => "task.status",
            Self::QueueEnqueue => "queue.enqueue",
            Self::QueueStatus => "queue.status",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.version" => Some(Self::HostVersion),
            "task.start_timed" => Some(Self::TaskStartTimed),
            "task.start_sync" => Some(Self::TaskStartSync),
            "task.alarm_fired" => Some(Self::TaskAlarmFired),
            "task.stop" => Some(Self::TaskStop),
            "task.status" => Some(Self::TaskStatus),
            "queue.enqueue" => Some(Self::QueueEnqueue),
            "queue.status" => Some(Self::QueueStatus),
            "runtime.stop" => Some(Self::RuntimeStop),
            _ => None,
        }
    }
}

/// A versioned response envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from frontend -> backend host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CommandName; 10] = [
        CommandName::HostPing,
        CommandName::HostVersion,
        CommandName::TaskStartTimed,
        CommandName::TaskStartSync,
        CommandName::TaskAlarmFired,
        CommandName::TaskStop,
        CommandName::TaskStatus,
        CommandName::QueueEnqueue,
        CommandName::QueueStatus,
        CommandName::RuntimeStop,
    ];

    #[test]
    fn wire_names_match_serde_renames() {
        for command in ALL {
            let json = serde_json::to_value(command).expect("serialize in test");
            assert_eq!(json, serde_json::Value::String(command.as_str().to_owned()));
            assert_eq!(CommandName::parse(command.as_str()), Some(command));
        }
        assert_eq!(CommandName::parse("scheduler.list"), None);
    }

    #[test]
    fn validate_rejects_wrong_version_and_blank_id() {
        let mut envelope =
            CommandEnvelope::new("req-1", CommandName::TaskStatus, serde_json::json!({}));
        assert!(envelope.validate().is_ok());

        envelope.v = 2;
        let err = envelope.validate().expect_err("version mismatch");
        assert_eq!(err.kind, ContractErrorKind::UnsupportedVersion);

        let blank = CommandEnvelope::new("  ", CommandName::TaskStatus, serde_json::json!({}));
        let err = blank.validate().expect_err("blank id");
        assert_eq!(err.kind, ContractErrorKind::InvalidEnvelope);
    }
}
