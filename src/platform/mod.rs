//! Host platform capabilities: wake locks and exact wake alarms.
//!
//! Both are best-effort. A host that cannot provide them still runs timed
//! sessions, just without the guarantee that the process stays awake or is
//! relaunched after suspension.

use std::sync::Arc;

use chrono::{DateTime, Utc};

mod stub;
mod tokio_alarm;

pub use stub::{NoopWakeLock, UnsupportedAlarmHost};
pub use tokio_alarm::{AlarmCallback, TokioAlarmHost};

/// Keeps the CPU running while a session or sync is active.
pub trait WakeLock: Send + Sync {
    /// Acquire the lock under `tag`.
    fn acquire(&self, tag: &str) -> anyhow::Result<()>;

    /// Release a lock previously acquired under `tag`.
    fn release(&self, tag: &str);
}

/// Registers one-shot absolute-time wake triggers with the host OS.
///
/// There is a single pending slot: setting an alarm replaces whatever was
/// pending. When the trigger fires the host redelivers an alarm-fired start
/// intent to the supervisor.
pub trait AlarmHost: Send + Sync {
    /// Whether this host can register exact (alarm-clock) triggers.
    fn supports_exact_alarms(&self) -> bool;

    /// Register (or replace) the pending trigger at `at`.
    fn set_alarm(&self, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Cancel the pending trigger, if any.
    fn cancel_alarm(&self);

    /// The pending trigger time, when the host can report it.
    fn pending_alarm(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// A held wake lock, released on drop.
pub struct WakeLockGuard {
    lock: Arc<dyn WakeLock>,
    tag: String,
}

impl WakeLockGuard {
    /// Acquire `lock` under `tag`.
    pub fn acquire(lock: Arc<dyn WakeLock>, tag: impl Into<String>) -> anyhow::Result<Self> {
        let tag = tag.into();
        lock.acquire(&tag)?;
        tracing::debug!(tag = %tag, "wake lock acquired");
        Ok(Self { lock, tag })
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        self.lock.release(&self.tag);
        tracing::debug!(tag = %self.tag, "wake lock released");
    }
}

impl std::fmt::Debug for WakeLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLockGuard")
            .field("tag", &self.tag)
            .finish()
    }
}
