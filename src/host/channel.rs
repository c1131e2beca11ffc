//! Host command channel and router.
//!
//! The host shell talks to the subsystem only through envelopes. Task
//! commands are forwarded to the [`SupervisorHandle`]; queue commands go
//! straight to the [`OfflineQueue`].
//!
//! The router applies commands in arrival order but never waits for a
//! supervisor reply itself: a `task.start_sync` that is still draining does
//! not hold back the `task.stop` behind it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::queue::{OfflineQueue, PendingOperation};
use crate::supervisor::{StartIntent, StartOutcome, SupervisorHandle};
use crate::sync::DrainOutcome;
use tokio::sync::{broadcast, mpsc, oneshot};

type ResponseFuture = Pin<Box<dyn Future<Output = Result<ResponseEnvelope>> + Send>>;

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

/// A command accepted by the router whose response is not in yet.
pub struct PendingResponse {
    request_id: String,
    rx: oneshot::Receiver<Result<ResponseEnvelope>>,
}

impl PendingResponse {
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn recv(self) -> Result<ResponseEnvelope> {
        self.rx
            .await
            .map_err(|e| SyncError::Channel(format!("host command response dropped: {e}")))?
    }
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        self.submit(envelope).await?.recv().await
    }

    /// Hand a command to the router without waiting for its response.
    /// Commands submitted in order are applied in order.
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<PendingResponse> {
        envelope.validate().map_err(|e| {
            SyncError::Host(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let request_id = envelope.request_id.clone();
        let (response_tx, rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| SyncError::Channel(format!("failed to send host command request: {e}")))?;

        Ok(PendingResponse { request_id, rx })
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    router: Router,
}

#[derive(Clone)]
struct Router {
    event_tx: broadcast::Sender<EventEnvelope>,
    supervisor: SupervisorHandle,
    queue: Arc<OfflineQueue>,
}

/// What routing a command produced.
enum Routed {
    Done(Result<ResponseEnvelope>),
    /// Queued on the supervisor; resolves when it replies.
    Awaiting(ResponseFuture),
}

/// Create a command channel using an existing event broadcast sender.
///
/// The notification surface publishes on the same sender, so notices and
/// command events reach the host through one stream.
#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    supervisor: SupervisorHandle,
    queue: Arc<OfflineQueue>,
) -> (HostCommandClient, HostCommandServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            router: Router {
                event_tx,
                supervisor,
                queue,
            },
        },
    )
}

impl HostCommandServer {
    /// Route requests until every client is dropped. Supervisor replies are
    /// awaited on their own tasks.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            match self.router.dispatch(&request.envelope) {
                Routed::Done(response) => {
                    let _ = request.response_tx.send(response);
                }
                Routed::Awaiting(response) => {
                    tokio::spawn(async move {
                        let _ = request.response_tx.send(response.await);
                    });
                }
            }
        }
        tracing::debug!("host command server stopped");
    }

    /// Route one envelope and wait for its response.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match self.router.dispatch(envelope) {
            Routed::Done(response) => response,
            Routed::Awaiting(response) => response.await,
        }
    }
}

impl Router {
    fn dispatch(&self, envelope: &CommandEnvelope) -> Routed {
        let request_id = envelope.request_id.clone();
        match envelope.command {
            CommandName::HostPing => Routed::Done(Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"pong": true}),
            ))),
            CommandName::HostVersion => Routed::Done(Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({
                    "contract_version": crate::host::contract::EVENT_VERSION,
                    "crate_version": env!("CARGO_PKG_VERSION"),
                }),
            ))),
            CommandName::TaskStartTimed => match parse_limit_secs(&envelope.payload) {
                Ok(limit_secs) => {
                    self.start(request_id, StartIntent::TimedRecording { limit_secs })
                }
                Err(e) => Routed::Done(Err(e)),
            },
            CommandName::TaskStartSync => self.start(request_id, StartIntent::SyncDrain),
            CommandName::TaskAlarmFired => self.start(request_id, StartIntent::AlarmFired),
            CommandName::TaskStop => match self.supervisor.submit_stop() {
                Ok(reply) => Routed::Awaiting(Box::pin(async move {
                    let status = reply.recv().await?;
                    Ok(ResponseEnvelope::ok(request_id, to_payload(&status)?))
                })),
                Err(e) => Routed::Done(Err(e)),
            },
            CommandName::TaskStatus => match self.supervisor.submit_status() {
                Ok(reply) => Routed::Awaiting(Box::pin(async move {
                    let status = reply.recv().await?;
                    Ok(ResponseEnvelope::ok(request_id, to_payload(&status)?))
                })),
                Err(e) => Routed::Done(Err(e)),
            },
            CommandName::QueueEnqueue => Routed::Done(self.handle_queue_enqueue(envelope)),
            CommandName::QueueStatus => Routed::Done(
                self.queue
                    .len()
                    .map(|pending| {
                        ResponseEnvelope::ok(request_id, serde_json::json!({"pending": pending}))
                    })
                    .map_err(SyncError::from),
            ),
            CommandName::RuntimeStop => match self.supervisor.submit_shutdown() {
                Ok(reply) => {
                    let events = self.event_tx.clone();
                    Routed::Awaiting(Box::pin(async move {
                        reply.recv().await?;
                        emit_event(
                            &events,
                            "runtime.stopped",
                            serde_json::json!({"request_id": request_id}),
                        );
                        Ok(ResponseEnvelope::ok(
                            request_id,
                            serde_json::json!({"accepted": true}),
                        ))
                    }))
                }
                Err(e) => Routed::Done(Err(e)),
            },
        }
    }

    fn start(&self, request_id: String, intent: StartIntent) -> Routed {
        match self.supervisor.submit_start(intent) {
            Ok(reply) => Routed::Awaiting(Box::pin(async move {
                let outcome = reply.recv().await?;
                Ok(ResponseEnvelope::ok(request_id, outcome_payload(&outcome)))
            })),
            Err(e) => Routed::Done(Err(e)),
        }
    }

    fn handle_queue_enqueue(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let op: PendingOperation = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| SyncError::Host(format!("queue.enqueue payload is invalid: {e}")))?;
        let seq = self.queue.enqueue(&op)?;

        emit_event(
            &self.event_tx,
            "queue.enqueued",
            serde_json::json!({
                "request_id": envelope.request_id,
                "seq": seq,
                "destination_kind": op.destination_kind.as_str(),
            }),
        );

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "seq": seq}),
        ))
    }
}

fn emit_event(
    event_tx: &broadcast::Sender<EventEnvelope>,
    event: &str,
    payload: serde_json::Value,
) {
    let envelope =
        EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
    let _ = event_tx.send(envelope);
}

fn parse_limit_secs(payload: &serde_json::Value) -> Result<u64> {
    payload
        .get("limit_secs")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            SyncError::Host(
                "task.start_timed requires a non-negative integer payload.limit_secs".to_owned(),
            )
        })
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| SyncError::Host(format!("failed to serialize response payload: {e}")))
}

fn outcome_payload(outcome: &StartOutcome) -> serde_json::Value {
    match outcome {
        StartOutcome::Recording {
            run_id,
            limit_secs,
            wake_at,
        } => serde_json::json!({
            "mode": "recording",
            "run_id": run_id,
            "limit_secs": limit_secs,
            "wake_at": wake_at,
        }),
        StartOutcome::Drained(report) => {
            let (result, detail) = match &report.outcome {
                DrainOutcome::Emptied => ("emptied", serde_json::Value::Null),
                DrainOutcome::Failed { seq, failure } => (
                    "failed",
                    serde_json::json!({
                        "seq": seq,
                        "message": failure.message,
                        "status_code": failure.status_code,
                    }),
                ),
                DrainOutcome::Stalled { seq, destination } => (
                    "stalled",
                    serde_json::json!({"seq": seq, "destination": destination}),
                ),
                DrainOutcome::StoreError(message) => {
                    ("store_error", serde_json::json!({"message": message}))
                }
                DrainOutcome::Cancelled => ("cancelled", serde_json::Value::Null),
            };
            serde_json::json!({
                "mode": "sync",
                "sent": report.sent,
                "dropped": report.dropped,
                "outcome": result,
                "detail": detail,
            })
        }
        StartOutcome::Rearmed { wake_at } => serde_json::json!({
            "mode": "alarm",
            "rearmed": true,
            "wake_at": wake_at,
        }),
        StartOutcome::Ignored => serde_json::json!({"mode": "alarm", "rearmed": false}),
    }
}
