#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use serde_json::json;
use studysync::config::{StudySyncConfig, SyncConfig};
use studysync::queue::{DestinationKind, HttpMethod, OfflineQueue, PendingOperation};
use studysync::sync::{
    Collaborators, DrainOutcome, HttpCollaborator, StaticCredentials, SyncDispatcher,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn collaborators(config: &SyncConfig) -> Collaborators {
    let credentials = Arc::new(StaticCredentials {
        auth_token: Some("tok".to_owned()),
        user_id: Some("participant-1".to_owned()),
    });
    Collaborators {
        user_profile: Arc::new(HttpCollaborator::registration(config, credentials).unwrap()),
        study_response: Arc::new(HttpCollaborator::response(config).unwrap()),
    }
}

fn response_write(server: &MockServer, n: u32) -> PendingOperation {
    PendingOperation::new(
        HttpMethod::Post,
        format!("{}/responses/{n}", server.uri()),
        &json!({ "answer": n }),
        DestinationKind::ResponseProcessing,
    )
}

#[test]
fn queued_entry_survives_reopen_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let op = PendingOperation::new(
        HttpMethod::Put,
        "https://example.org/participant/prefs",
        &json!({ "remote_notifications": true }),
        DestinationKind::RegistrationPreferenceUpdate,
    )
    .with_param("studyId", "S-12");

    {
        let queue = OfflineQueue::open(dir.path()).unwrap();
        queue.enqueue(&op).unwrap();
    }

    let reopened = OfflineQueue::open(dir.path()).unwrap();
    let head = reopened.peek_oldest().unwrap().expect("entry persisted");
    assert_eq!(head.op, op);
    assert_eq!(reopened.len().unwrap(), 1);
}

#[tokio::test]
async fn outage_then_recovery_replays_in_order() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = StudySyncConfig::default();
    let queue = Arc::new(OfflineQueue::open(dir.path()).unwrap());
    for n in 1..=4 {
        queue.enqueue(&response_write(&server, n)).unwrap();
    }

    // Entry 1 goes through, entry 2 hits an outage.
    Mock::given(method("POST"))
        .and(path("/responses/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let outage = Mock::given(method("POST"))
        .and(path("/responses/2"))
        .respond_with(ResponseTemplate::new(503))
        .mount_as_scoped(&server)
        .await;

    let mut dispatcher = SyncDispatcher::new(Arc::clone(&queue), collaborators(&config.sync));
    let report = dispatcher.drain().await;

    assert_eq!(report.sent, 1);
    assert!(matches!(report.outcome, DrainOutcome::Failed { .. }));
    assert_eq!(queue.len().unwrap(), 3);
    drop(outage);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let report = dispatcher.drain().await;
    assert_eq!(report.sent, 3);
    assert_eq!(report.outcome, DrainOutcome::Emptied);
    assert!(queue.is_empty().unwrap());

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_owned())
        .collect();
    assert_eq!(
        paths,
        vec![
            "/responses/1",
            "/responses/2",
            "/responses/2",
            "/responses/3",
            "/responses/4"
        ]
    );
}

#[tokio::test]
async fn registration_writes_are_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/participant"))
        .and(header("auth", "tok"))
        .and(header("userId", "participant-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(OfflineQueue::in_memory().unwrap());
    queue
        .enqueue(&PendingOperation::new(
            HttpMethod::Patch,
            format!("{}/participant", server.uri()),
            &json!({ "locale": "en" }),
            DestinationKind::RegistrationPreferenceUpdate,
        ))
        .unwrap();

    let mut dispatcher =
        SyncDispatcher::new(Arc::clone(&queue), collaborators(&SyncConfig::default()));
    let report = dispatcher.drain().await;

    assert!(report.emptied_queue());
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn reserved_destination_stalls_until_policy_changes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let queue = Arc::new(OfflineQueue::in_memory().unwrap());
    queue
        .enqueue(&PendingOperation::new(
            HttpMethod::Post,
            format!("{}/wcp", server.uri()),
            &json!({}),
            DestinationKind::ReservedUnused,
        ))
        .unwrap();
    queue.enqueue(&response_write(&server, 1)).unwrap();

    let config = SyncConfig::default();
    let mut stalling = SyncDispatcher::new(Arc::clone(&queue), collaborators(&config));
    let report = stalling.drain().await;
    assert!(matches!(report.outcome, DrainOutcome::Stalled { .. }));
    assert_eq!(queue.len().unwrap(), 2);

    let mut dropping = SyncDispatcher::new(Arc::clone(&queue), collaborators(&config))
        .with_unrecognized_policy(studysync::config::UnrecognizedDestinationPolicy::Drop);
    let report = dropping.drain().await;
    assert_eq!(report.dropped, 1);
    assert_eq!(report.sent, 1);
    assert!(queue.is_empty().unwrap());
}
