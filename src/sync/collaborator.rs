//! Network collaborators that replayed writes are handed to.

use std::sync::Arc;

use async_trait::async_trait;

use crate::queue::HttpMethod;

/// A decoded queue entry ready to go over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub payload: serde_json::Value,
}

/// Why a send did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (status {status})", status = status_label(.status_code))]
pub struct SendFailure {
    pub message: String,
    /// HTTP status when the server answered, `None` for transport errors.
    pub status_code: Option<u16>,
}

fn status_label(code: &Option<u16>) -> String {
    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
}

impl SendFailure {
    #[must_use]
    pub fn new(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status_code,
        }
    }
}

/// Sends one request and reports success or failure.
///
/// Called at most once at a time per drain. No internal timeout is
/// required; a hang stalls only the drain that issued it.
#[async_trait]
pub trait NetworkCollaborator: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<(), SendFailure>;
}

/// Downstream processors, one per routable destination kind.
#[derive(Clone)]
pub struct Collaborators {
    /// Receives `registration-preference-update` entries.
    pub user_profile: Arc<dyn NetworkCollaborator>,
    /// Receives `response-processing` entries.
    pub study_response: Arc<dyn NetworkCollaborator>,
}

/// Supplies the participant's auth token and user id.
///
/// Token refresh is out of scope; this only reads what the app stored.
pub trait CredentialSource: Send + Sync {
    fn auth_token(&self) -> Option<String>;
    fn user_id(&self) -> Option<String>;
}

/// Fixed credentials, e.g. handed over by the host at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
}

impl CredentialSource for StaticCredentials {
    fn auth_token(&self) -> Option<String> {
        self.auth_token.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_includes_status() {
        let failure = SendFailure::new("server said no", Some(503));
        assert_eq!(failure.to_string(), "server said no (status 503)");

        let offline = SendFailure::new("connection refused", None);
        assert_eq!(offline.to_string(), "connection refused (status none)");
    }
}
