//! User-visible notification surface.
//!
//! The subsystem never renders anything itself. It hands notices to a
//! [`NotificationSurface`] and forgets about them: there is no
//! acknowledgement channel and implementations must not block.

use crate::host::contract::EventEnvelope;
use tokio::sync::broadcast;

/// Ongoing notice id while a timed recording runs.
pub const RECORDING_NOTICE_ID: u32 = 101;

/// Ongoing notice id while the offline queue syncs.
pub const SYNC_NOTICE_ID: u32 = 102;

/// A title/body pair shown to the participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub ticker: Option<String>,
    pub body: String,
}

impl Notice {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ticker: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }
}

/// Outbound notification collaborator.
pub trait NotificationSurface: Send + Sync + 'static {
    /// Show (or replace) the ongoing indicator with the given id.
    fn show_ongoing(&self, id: u32, notice: &Notice);

    /// Remove the ongoing indicator with the given id.
    fn clear_ongoing(&self, id: u32);

    /// Post a reminder. Distinct ids never collapse into one notice.
    fn post_reminder(&self, id: u64, notice: &Notice);

    /// Per-tick progress for foreground UI.
    fn post_progress(&self, _elapsed_secs: u64, _limit_secs: u64) {}
}

/// Notification surface that only logs.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl NotificationSurface for TracingNotifier {
    fn show_ongoing(&self, id: u32, notice: &Notice) {
        tracing::info!(id, title = %notice.title, body = %notice.body, "ongoing notice shown");
    }

    fn clear_ongoing(&self, id: u32) {
        tracing::info!(id, "ongoing notice cleared");
    }

    fn post_reminder(&self, id: u64, notice: &Notice) {
        tracing::info!(id, body = %notice.body, "reminder posted");
    }

    fn post_progress(&self, elapsed_secs: u64, limit_secs: u64) {
        tracing::trace!(elapsed_secs, limit_secs, "progress");
    }
}

/// Notification surface that publishes host events on a broadcast channel.
///
/// Events go out as `notification.ongoing`, `notification.ongoing_cleared`,
/// `notification.reminder` and `task.progress`. A send with no subscribers
/// is not an error.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl EventNotifier {
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self { event_tx }
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        let _ = self.event_tx.send(envelope);
    }
}

impl NotificationSurface for EventNotifier {
    fn show_ongoing(&self, id: u32, notice: &Notice) {
        self.emit(
            "notification.ongoing",
            serde_json::json!({
                "id": id,
                "title": notice.title,
                "ticker": notice.ticker,
                "body": notice.body,
            }),
        );
    }

    fn clear_ongoing(&self, id: u32) {
        self.emit("notification.ongoing_cleared", serde_json::json!({ "id": id }));
    }

    fn post_reminder(&self, id: u64, notice: &Notice) {
        self.emit(
            "notification.reminder",
            serde_json::json!({
                "id": id,
                "title": notice.title,
                "body": notice.body,
            }),
        );
    }

    fn post_progress(&self, elapsed_secs: u64, limit_secs: u64) {
        self.emit(
            "task.progress",
            serde_json::json!({ "elapsed_secs": elapsed_secs, "limit_secs": limit_secs }),
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn event_notifier_publishes_reminder_with_id() {
        let (tx, mut rx) = broadcast::channel(8);
        let notifier = EventNotifier::new(tx);
        notifier.post_reminder(1800, &Notice::new("Study", "Still recording"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, "notification.reminder");
        assert_eq!(event.payload["id"], 1800);
        assert_eq!(event.payload["body"], "Still recording");
    }

    #[test]
    fn event_notifier_without_subscribers_does_not_fail() {
        let (tx, rx) = broadcast::channel(1);
        drop(rx);
        let notifier = EventNotifier::new(tx);
        notifier.show_ongoing(RECORDING_NOTICE_ID, &Notice::new("Study", "Recording"));
        notifier.clear_ongoing(RECORDING_NOTICE_ID);
    }

    #[test]
    fn ongoing_event_carries_ticker() {
        let (tx, mut rx) = broadcast::channel(8);
        let notifier = EventNotifier::new(tx);
        notifier.show_ongoing(
            SYNC_NOTICE_ID,
            &Notice::new("Study", "Syncing offline data").with_ticker("Sync adapter"),
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, "notification.ongoing");
        assert_eq!(event.payload["id"], 102);
        assert_eq!(event.payload["ticker"], "Sync adapter");
    }
}
