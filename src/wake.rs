//! Keeps the host's wake schedule alive across long sessions.
//!
//! Every arm registers a single trigger a fixed look-ahead in the future.
//! There is no backoff and no jitter: re-arming just moves the one pending
//! trigger forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::platform::AlarmHost;

/// Default alarm look-ahead (3 minutes).
pub const WAKE_LOOKAHEAD_MS: u64 = 180_000;

/// Arms and disarms the host wake alarm.
pub struct WakeScheduler {
    host: Arc<dyn AlarmHost>,
    lookahead: chrono::Duration,
    enabled: bool,
}

impl WakeScheduler {
    #[must_use]
    pub fn new(host: Arc<dyn AlarmHost>) -> Self {
        Self {
            host,
            lookahead: lookahead_from_ms(WAKE_LOOKAHEAD_MS),
            enabled: true,
        }
    }

    #[must_use]
    pub fn from_config(host: Arc<dyn AlarmHost>, config: &crate::config::WakeConfig) -> Self {
        Self {
            host,
            lookahead: lookahead_from_ms(config.lookahead_ms),
            enabled: config.exact_alarms,
        }
    }

    /// Whether arming can register anything on this host.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.enabled && self.host.supports_exact_alarms()
    }

    /// Arm the wake trigger at `now + lookahead`.
    ///
    /// Returns the registered trigger time, or `None` when this host has no
    /// exact alarms or registration failed. Never an error: a missing wake
    /// guarantee degrades the session, it does not abort it.
    pub fn arm(&self) -> Option<DateTime<Utc>> {
        self.arm_from(Utc::now())
    }

    /// Arm relative to an explicit `now`.
    pub fn arm_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_available() {
            debug!("exact alarms unavailable; running without wake trigger");
            return None;
        }

        let Some(at) = now.checked_add_signed(self.lookahead) else {
            warn!("wake look-ahead overflows the clock; not arming");
            return None;
        };
        match self.host.set_alarm(at) {
            Ok(()) => {
                info!(at = %at, "wake alarm armed");
                Some(at)
            }
            Err(e) => {
                warn!(error = %e, "cannot register wake alarm");
                None
            }
        }
    }

    /// Cancel the pending trigger.
    pub fn disarm(&self) {
        if self.is_available() {
            self.host.cancel_alarm();
            debug!("wake alarm disarmed");
        }
    }

    #[must_use]
    pub fn pending(&self) -> Option<DateTime<Utc>> {
        self.host.pending_alarm()
    }
}

fn lookahead_from_ms(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::UnsupportedAlarmHost;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        slot: Mutex<Option<DateTime<Utc>>>,
        sets: Mutex<usize>,
    }

    impl AlarmHost for RecordingHost {
        fn supports_exact_alarms(&self) -> bool {
            true
        }

        fn set_alarm(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
            *self.slot.lock().unwrap() = Some(at);
            *self.sets.lock().unwrap() += 1;
            Ok(())
        }

        fn cancel_alarm(&self) {
            *self.slot.lock().unwrap() = None;
        }

        fn pending_alarm(&self) -> Option<DateTime<Utc>> {
            *self.slot.lock().unwrap()
        }
    }

    struct FailingHost;

    impl AlarmHost for FailingHost {
        fn supports_exact_alarms(&self) -> bool {
            true
        }

        fn set_alarm(&self, _at: DateTime<Utc>) -> anyhow::Result<()> {
            anyhow::bail!("alarm service unavailable")
        }

        fn cancel_alarm(&self) {}
    }

    #[test]
    fn arms_exactly_three_minutes_ahead() {
        let host = Arc::new(RecordingHost::default());
        let scheduler = WakeScheduler::new(host.clone());
        let now = Utc::now();

        let at = scheduler.arm_from(now).unwrap();

        assert_eq!(at - now, chrono::Duration::milliseconds(180_000));
        assert_eq!(scheduler.pending(), Some(at));
    }

    #[test]
    fn re_arm_replaces_pending_trigger() {
        let host = Arc::new(RecordingHost::default());
        let scheduler = WakeScheduler::new(host.clone());
        let now = Utc::now();

        scheduler.arm_from(now);
        let later = scheduler
            .arm_from(now + chrono::Duration::seconds(60))
            .unwrap();

        assert_eq!(scheduler.pending(), Some(later));
        assert_eq!(*host.sets.lock().unwrap(), 2);
    }

    #[test]
    fn unsupported_host_degrades_to_none() {
        let scheduler = WakeScheduler::new(Arc::new(UnsupportedAlarmHost));
        assert!(!scheduler.is_available());
        assert!(scheduler.arm().is_none());
        scheduler.disarm();
    }

    #[test]
    fn disabled_in_config_never_registers() {
        let host = Arc::new(RecordingHost::default());
        let config = crate::config::WakeConfig {
            exact_alarms: false,
            ..Default::default()
        };
        let scheduler = WakeScheduler::from_config(host.clone(), &config);
        assert!(scheduler.arm().is_none());
        assert_eq!(*host.sets.lock().unwrap(), 0);
    }

    #[test]
    fn registration_failure_is_not_fatal() {
        let scheduler = WakeScheduler::new(Arc::new(FailingHost));
        assert!(scheduler.arm().is_none());
    }

    #[test]
    fn disarm_clears_pending() {
        let host = Arc::new(RecordingHost::default());
        let scheduler = WakeScheduler::new(host.clone());
        scheduler.arm();
        scheduler.disarm();
        assert!(scheduler.pending().is_none());
    }
}
