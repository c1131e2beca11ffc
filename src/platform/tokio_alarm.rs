//! In-process alarm host backed by tokio timers.
//!
//! Stands in for an OS alarm service on desktop hosts and in tests. Holds at
//! most one pending trigger; setting a new one aborts the old one.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::AlarmHost;

/// Called on the runtime when the pending trigger fires.
pub type AlarmCallback = Arc<dyn Fn() + Send + Sync>;

/// Single-slot alarm host running on the current tokio runtime.
pub struct TokioAlarmHost {
    on_fire: AlarmCallback,
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<Pending>,
}

struct Pending {
    at: DateTime<Utc>,
    task: JoinHandle<()>,
}

impl TokioAlarmHost {
    #[must_use]
    pub fn new(on_fire: AlarmCallback) -> Self {
        Self {
            on_fire,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Number of triggers currently waiting to fire (0 or 1).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slot
            .lock()
            .map(|slot| usize::from(slot.pending.is_some()))
            .unwrap_or(0)
    }
}

impl AlarmHost for TokioAlarmHost {
    fn supports_exact_alarms(&self) -> bool {
        true
    }

    fn set_alarm(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("no tokio runtime for alarm: {e}"))?;
        let delay = (at - Utc::now()).to_std().unwrap_or_default();

        let mut slot = self
            .slot
            .lock()
            .map_err(|e| anyhow::anyhow!("alarm slot poisoned: {e}"))?;
        if let Some(previous) = slot.pending.take() {
            previous.task.abort();
            debug!(previous = %previous.at, "pending alarm replaced");
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        let shared = Arc::clone(&self.slot);
        let on_fire = Arc::clone(&self.on_fire);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = match shared.lock() {
                Ok(mut slot) if slot.generation == generation => {
                    slot.pending = None;
                    true
                }
                Ok(_) => false,
                Err(e) => {
                    warn!("alarm slot poisoned on fire: {e}");
                    false
                }
            };
            if still_current {
                debug!("wake alarm fired");
                on_fire();
            }
        });

        slot.pending = Some(Pending { at, task });
        Ok(())
    }

    fn cancel_alarm(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.generation = slot.generation.wrapping_add(1);
            if let Some(pending) = slot.pending.take() {
                pending.task.abort();
                debug!(at = %pending.at, "pending alarm cancelled");
            }
        }
    }

    fn pending_alarm(&self) -> Option<DateTime<Utc>> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.pending.as_ref().map(|p| p.at))
    }
}

impl Drop for TokioAlarmHost {
    fn drop(&mut self) {
        self.cancel_alarm();
    }
}
