//! HTTP collaborator used to replay queued writes against the study servers.
//!
//! Registration-server writes carry the participant's `auth` and `userId`
//! headers; response-server writes carry none. Form parameters travel on
//! the query string and every method except `GET` sends the JSON body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::collaborator::{CredentialSource, NetworkCollaborator, OutboundRequest, SendFailure};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::queue::HttpMethod;

/// Which server family a collaborator talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Registration,
    Response,
}

/// `reqwest`-backed [`NetworkCollaborator`].
pub struct HttpCollaborator {
    client: reqwest::Client,
    kind: ServerKind,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl HttpCollaborator {
    /// Collaborator for registration-server writes, authenticated with
    /// `credentials`.
    pub fn registration(
        config: &SyncConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            kind: ServerKind::Registration,
            credentials: Some(credentials),
        })
    }

    /// Collaborator for response-server writes.
    pub fn response(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            kind: ServerKind::Response,
            credentials: None,
        })
    }

    #[must_use]
    pub fn kind(&self) -> ServerKind {
        self.kind
    }

    fn build_request(
        &self,
        request: &OutboundRequest,
    ) -> std::result::Result<reqwest::RequestBuilder, SendFailure> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| SendFailure::new(format!("invalid url `{}`: {e}", request.url), None))?;

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if request.method != HttpMethod::Get {
            builder = builder.json(&request.payload);
        }

        if let Some(credentials) = &self.credentials {
            builder = builder
                .header("auth", credentials.auth_token().unwrap_or_default())
                .header("userId", credentials.user_id().unwrap_or_default());
        }

        Ok(builder)
    }
}

fn build_client(config: &SyncConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
    if config.request_timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
    }
    builder
        .build()
        .map_err(|e| SyncError::Network(format!("cannot build HTTP client: {e}")))
}

#[async_trait]
impl NetworkCollaborator for HttpCollaborator {
    async fn send(&self, request: &OutboundRequest) -> std::result::Result<(), SendFailure> {
        let builder = self.build_request(request)?;
        debug!(
            kind = ?self.kind,
            method = %request.method,
            url = %request.url,
            "sending queued write"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| SendFailure::new(format!("request failed: {e}"), None))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request rejected")
                .to_owned()
        } else {
            body
        };
        Err(SendFailure::new(message, Some(status.as_u16())))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::sync::collaborator::StaticCredentials;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Arc<dyn CredentialSource> {
        Arc::new(StaticCredentials {
            auth_token: Some("token-abc".to_owned()),
            user_id: Some("user-7".to_owned()),
        })
    }

    fn request(url: String, http_method: HttpMethod) -> OutboundRequest {
        OutboundRequest {
            method: http_method,
            url,
            params: vec![("studyId".to_owned(), "S1".to_owned())],
            payload: json!({ "remote": true }),
        }
    }

    #[tokio::test]
    async fn registration_writes_carry_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/updatePreferences"))
            .and(header("auth", "token-abc"))
            .and(header("userId", "user-7"))
            .and(query_param("studyId", "S1"))
            .and(body_json(json!({ "remote": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let collaborator =
            HttpCollaborator::registration(&SyncConfig::default(), credentials()).unwrap();
        let result = collaborator
            .send(&request(
                format!("{}/updatePreferences", server.uri()),
                HttpMethod::Post,
            ))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn server_error_reports_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let collaborator = HttpCollaborator::response(&SyncConfig::default()).unwrap();
        let failure = collaborator
            .send(&request(format!("{}/process", server.uri()), HttpMethod::Put))
            .await
            .unwrap_err();

        assert_eq!(failure.status_code, Some(503));
        assert_eq!(failure.message, "maintenance");
    }

    #[tokio::test]
    async fn response_writes_have_no_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let collaborator = HttpCollaborator::response(&SyncConfig::default()).unwrap();
        collaborator
            .send(&request(format!("{}/process", server.uri()), HttpMethod::Post))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].headers.get("auth").is_none());
    }

    #[tokio::test]
    async fn write_without_params_sends_body_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .and(body_json(json!({ "remote": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let collaborator = HttpCollaborator::response(&SyncConfig::default()).unwrap();
        let mut bare = request(format!("{}/process", server.uri()), HttpMethod::Post);
        bare.params.clear();
        collaborator.send(&bare).await.unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].url.query(), None);
    }

    #[tokio::test]
    async fn invalid_url_fails_without_status() {
        let collaborator = HttpCollaborator::response(&SyncConfig::default()).unwrap();
        let failure = collaborator
            .send(&request("not a url".to_owned(), HttpMethod::Get))
            .await
            .unwrap_err();
        assert_eq!(failure.status_code, None);
    }
}
