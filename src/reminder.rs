//! Periodic reminders while a timed session runs.

use std::sync::Arc;

use crate::error::Result;
use crate::notify::{Notice, NotificationSurface};
use crate::timer::{Tick, TickListener};

/// Raise a reminder every this many ticks (30 minutes).
pub const REMINDER_INTERVAL_TICKS: u64 = 1800;

/// Tick listener that posts a reminder whenever the elapsed count is a
/// multiple of the interval. Each reminder uses the tick count as its id.
pub struct ReminderSink {
    notifier: Arc<dyn NotificationSurface>,
    notice: Notice,
    interval_ticks: u64,
}

impl ReminderSink {
    #[must_use]
    pub fn new(notifier: Arc<dyn NotificationSurface>, notice: Notice) -> Self {
        Self {
            notifier,
            notice,
            interval_ticks: REMINDER_INTERVAL_TICKS,
        }
    }

    /// Override the cadence. Zero is treated as one.
    #[must_use]
    pub fn with_interval(mut self, interval_ticks: u64) -> Self {
        self.interval_ticks = interval_ticks.max(1);
        self
    }

    #[must_use]
    pub fn is_reminder_tick(&self, elapsed_secs: u64) -> bool {
        elapsed_secs > 0 && elapsed_secs % self.interval_ticks == 0
    }
}

impl TickListener for ReminderSink {
    fn on_tick(&self, tick: Tick) -> Result<()> {
        if self.is_reminder_tick(tick.elapsed_secs) {
            tracing::debug!(elapsed_secs = tick.elapsed_secs, "raising session reminder");
            self.notifier.post_reminder(tick.elapsed_secs, &self.notice);
        }
        Ok(())
    }
}

/// Tick listener that forwards every tick to the notification surface as
/// foreground progress.
pub struct ProgressForwarder {
    notifier: Arc<dyn NotificationSurface>,
}

impl ProgressForwarder {
    #[must_use]
    pub fn new(notifier: Arc<dyn NotificationSurface>) -> Self {
        Self { notifier }
    }
}

impl TickListener for ProgressForwarder {
    fn on_tick(&self, tick: Tick) -> Result<()> {
        self.notifier.post_progress(tick.elapsed_secs, tick.limit_secs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        reminders: Mutex<Vec<u64>>,
        progress: Mutex<Vec<u64>>,
    }

    impl NotificationSurface for Captured {
        fn show_ongoing(&self, _id: u32, _notice: &Notice) {}
        fn clear_ongoing(&self, _id: u32) {}
        fn post_reminder(&self, id: u64, _notice: &Notice) {
            self.reminders.lock().unwrap().push(id);
        }
        fn post_progress(&self, elapsed_secs: u64, _limit_secs: u64) {
            self.progress.lock().unwrap().push(elapsed_secs);
        }
    }

    fn tick(n: u64) -> Tick {
        Tick {
            elapsed_secs: n,
            limit_secs: 5400,
        }
    }

    #[test]
    fn fires_only_on_multiples_of_interval() {
        let captured = Arc::new(Captured::default());
        let sink = ReminderSink::new(captured.clone(), Notice::new("Study", "Still recording"));

        for n in 1..=5399 {
            sink.on_tick(tick(n)).unwrap();
        }

        assert_eq!(*captured.reminders.lock().unwrap(), vec![1800, 3600]);
    }

    #[test]
    fn zero_never_fires() {
        let captured = Arc::new(Captured::default());
        let sink = ReminderSink::new(captured.clone(), Notice::new("Study", "x"));
        sink.on_tick(tick(0)).unwrap();
        assert!(captured.reminders.lock().unwrap().is_empty());
    }

    #[test]
    fn custom_interval() {
        let captured = Arc::new(Captured::default());
        let sink = ReminderSink::new(captured.clone(), Notice::new("Study", "x")).with_interval(10);
        for n in 1..=25 {
            sink.on_tick(tick(n)).unwrap();
        }
        assert_eq!(*captured.reminders.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn progress_forwards_every_tick() {
        let captured = Arc::new(Captured::default());
        let forwarder = ProgressForwarder::new(captured.clone());
        for n in 1..=3 {
            forwarder.on_tick(tick(n)).unwrap();
        }
        assert_eq!(*captured.progress.lock().unwrap(), vec![1, 2, 3]);
    }
}
