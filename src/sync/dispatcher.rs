//! Queue drain loop.
//!
//! A drain walks the offline queue from its head, sending one entry at a
//! time. An entry leaves the queue only after its collaborator confirms it.
//! The first failure ends the drain with the failed entry still at the
//! head; nothing behind it is attempted, and no retry is scheduled here.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::collaborator::{Collaborators, NetworkCollaborator, OutboundRequest, SendFailure};
use crate::config::UnrecognizedDestinationPolicy;
use crate::queue::{DestinationKind, OfflineQueue, QueueError, QueuedOperation};

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Draining,
}

/// Why a drain stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty.
    Emptied,
    /// A collaborator rejected entry `seq`; it is still queued.
    Failed { seq: i64, failure: SendFailure },
    /// Entry `seq` has a destination nobody consumes and the policy is to
    /// leave it in place.
    Stalled { seq: i64, destination: String },
    /// The store itself failed; the queue is unchanged past this point.
    StoreError(String),
    /// The drain was cancelled; the head entry is still queued.
    Cancelled,
}

/// Result of one drain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries confirmed and removed.
    pub sent: usize,
    /// Entries discarded as undeliverable (malformed or unroutable).
    pub dropped: usize,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    #[must_use]
    pub fn emptied_queue(&self) -> bool {
        self.outcome == DrainOutcome::Emptied
    }
}

/// Replays the offline queue through the network collaborators.
pub struct SyncDispatcher {
    queue: Arc<OfflineQueue>,
    collaborators: Collaborators,
    unrecognized: UnrecognizedDestinationPolicy,
    state: DispatcherState,
}

impl SyncDispatcher {
    #[must_use]
    pub fn new(queue: Arc<OfflineQueue>, collaborators: Collaborators) -> Self {
        Self {
            queue,
            collaborators,
            unrecognized: UnrecognizedDestinationPolicy::default(),
            state: DispatcherState::Idle,
        }
    }

    #[must_use]
    pub fn with_unrecognized_policy(mut self, policy: UnrecognizedDestinationPolicy) -> Self {
        self.unrecognized = policy;
        self
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Drain the queue until it is empty or an entry cannot be delivered.
    ///
    /// At most one send is in flight at any time.
    pub async fn drain(&mut self) -> DrainReport {
        self.drain_until(&CancellationToken::new()).await
    }

    /// Like [`drain`](Self::drain), but gives up as soon as `cancel` fires.
    ///
    /// A send that is abandoned mid-flight leaves its entry queued, so the
    /// next drain sends it again.
    pub async fn drain_until(&mut self, cancel: &CancellationToken) -> DrainReport {
        self.state = DispatcherState::Draining;
        info!("offline queue drain started");

        let mut sent = 0usize;
        let mut dropped = 0usize;

        let outcome = loop {
            if cancel.is_cancelled() {
                break DrainOutcome::Cancelled;
            }
            let head = match self.queue.peek_oldest() {
                Ok(Some(head)) => head,
                Ok(None) => break DrainOutcome::Emptied,
                Err(QueueError::Corrupt { seq, reason }) => {
                    warn!(seq, reason = %reason, "dropping undecodable queue entry");
                    if let Err(outcome) = self.discard_head() {
                        break outcome;
                    }
                    dropped += 1;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "cannot read offline queue");
                    break DrainOutcome::StoreError(e.to_string());
                }
            };

            let Some(collaborator) = self.route(&head.op.destination_kind) else {
                let destination = head.op.destination_kind.as_str().to_owned();
                match self.unrecognized {
                    UnrecognizedDestinationPolicy::Stall => {
                        warn!(
                            seq = head.seq,
                            destination = %destination,
                            "no collaborator for destination; leaving entry queued"
                        );
                        break DrainOutcome::Stalled {
                            seq: head.seq,
                            destination,
                        };
                    }
                    UnrecognizedDestinationPolicy::Drop => {
                        warn!(
                            seq = head.seq,
                            destination = %destination,
                            "no collaborator for destination; dropping entry"
                        );
                        if let Err(outcome) = self.discard_head() {
                            break outcome;
                        }
                        dropped += 1;
                        continue;
                    }
                }
            };

            let request = match decode_request(&head) {
                Ok(request) => request,
                Err(e) => {
                    warn!(seq = head.seq, error = %e, "dropping entry with malformed payload");
                    if let Err(outcome) = self.discard_head() {
                        break outcome;
                    }
                    dropped += 1;
                    continue;
                }
            };

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = collaborator.send(&request) => Some(result),
            };
            let Some(result) = result else {
                info!(seq = head.seq, "drain cancelled mid-send; entry stays queued");
                break DrainOutcome::Cancelled;
            };
            match result {
                Ok(()) => {
                    if let Err(e) = self.queue.remove_oldest() {
                        error!(seq = head.seq, error = %e, "sent entry could not be removed");
                        break DrainOutcome::StoreError(e.to_string());
                    }
                    sent += 1;
                    debug!(seq = head.seq, "queued write confirmed");
                }
                Err(failure) => {
                    warn!(
                        seq = head.seq,
                        status = ?failure.status_code,
                        error = %failure.message,
                        "queued write failed; drain ends"
                    );
                    break DrainOutcome::Failed {
                        seq: head.seq,
                        failure,
                    };
                }
            }
        };

        self.state = DispatcherState::Idle;
        info!(sent, dropped, ?outcome, "offline queue drain finished");
        DrainReport {
            sent,
            dropped,
            outcome,
        }
    }

    fn route(&self, kind: &DestinationKind) -> Option<Arc<dyn NetworkCollaborator>> {
        match kind {
            DestinationKind::RegistrationPreferenceUpdate => {
                Some(Arc::clone(&self.collaborators.user_profile))
            }
            DestinationKind::ResponseProcessing => {
                Some(Arc::clone(&self.collaborators.study_response))
            }
            DestinationKind::ReservedUnused | DestinationKind::Unrecognized(_) => None,
        }
    }

    fn discard_head(&self) -> Result<(), DrainOutcome> {
        self.queue.remove_oldest().map_err(|e| {
            error!(error = %e, "cannot discard queue head");
            DrainOutcome::StoreError(e.to_string())
        })
    }
}

fn decode_request(head: &QueuedOperation) -> Result<OutboundRequest, serde_json::Error> {
    let payload = serde_json::from_str(&head.op.json_payload)?;
    Ok(OutboundRequest {
        method: head.op.http_method,
        url: head.op.url.clone(),
        params: head.op.normal_params.clone(),
        payload,
    })
}
