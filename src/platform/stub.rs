//! No-op capabilities for hosts without wake locks or exact alarms.

use chrono::{DateTime, Utc};

use super::{AlarmHost, WakeLock};

/// Wake lock that does nothing.
///
/// Used on desktop hosts where the process is not suspended.
#[derive(Debug, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self, _tag: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn release(&self, _tag: &str) {}
}

/// Alarm host for platforms without exact alarms.
#[derive(Debug, Default)]
pub struct UnsupportedAlarmHost;

impl AlarmHost for UnsupportedAlarmHost {
    fn supports_exact_alarms(&self) -> bool {
        false
    }

    fn set_alarm(&self, _at: DateTime<Utc>) -> anyhow::Result<()> {
        anyhow::bail!("exact wake alarms are not supported on this platform")
    }

    fn cancel_alarm(&self) {}
}
