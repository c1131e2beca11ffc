//! Duration timer for timed recording sessions.
//!
//! [`DurationTimer::start`] spawns one tokio task that counts elapsed
//! seconds against a fixed schedule (`start + n * 1s`), so slow listeners
//! never push later ticks back. Cancellation is a
//! [`CancellationToken`]: it is raced against every wait and re-checked
//! right after each wake-up, so a stop never produces another tick.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// Interval between ticks.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// One elapsed-second increment of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub elapsed_secs: u64,
    pub limit_secs: u64,
}

/// Receives every tick, in order, exactly once.
///
/// Called on the timer task, so implementations must hand off anything
/// slow. An `Err` (or a panic) is logged and the timer keeps running.
pub trait TickListener: Send + Sync + 'static {
    fn on_tick(&self, tick: Tick) -> Result<()>;
}

/// How a timer run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The limit was reached.
    Completed { elapsed_secs: u64 },
    /// [`TimerHandle::stop`] was called first.
    Stopped { elapsed_secs: u64 },
}

impl TimerOutcome {
    #[must_use]
    pub fn elapsed_secs(self) -> u64 {
        match self {
            Self::Completed { elapsed_secs } | Self::Stopped { elapsed_secs } => elapsed_secs,
        }
    }
}

/// Invoked once on the timer task when a run ends, however it ends.
pub type CompletionHook = Box<dyn FnOnce(TimerOutcome) + Send + 'static>;

/// Ticking clock with registered listeners.
#[derive(Clone)]
pub struct DurationTimer {
    listeners: Vec<Arc<dyn TickListener>>,
    period: Duration,
}

impl Default for DurationTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationTimer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            period: TICK_PERIOD,
        }
    }

    /// Register a listener. Listeners run in registration order.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TickListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn TickListener>) {
        self.listeners.push(listener);
    }

    /// Start counting up to `limit_secs` on a new task.
    ///
    /// Must be called from within a tokio runtime. A limit of zero completes
    /// immediately without ticking.
    pub fn start(&self, limit_secs: u64, on_finish: Option<CompletionHook>) -> TimerHandle {
        let cancel = CancellationToken::new();
        let listeners = self.listeners.clone();
        let period = self.period;
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            info!(limit_secs, "duration timer started");
            let outcome = run_loop(&listeners, limit_secs, period, &token).await;
            info!(?outcome, "duration timer finished");
            if let Some(hook) = on_finish {
                hook(outcome);
            }
            outcome
        });

        TimerHandle { cancel, join }
    }
}

async fn run_loop(
    listeners: &[Arc<dyn TickListener>],
    limit_secs: u64,
    period: Duration,
    cancel: &CancellationToken,
) -> TimerOutcome {
    let mut elapsed_secs = 0u64;
    if limit_secs == 0 {
        return TimerOutcome::Completed { elapsed_secs };
    }

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        if cancel.is_cancelled() {
            return TimerOutcome::Stopped { elapsed_secs };
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return TimerOutcome::Stopped { elapsed_secs },
            _ = interval.tick() => {}
        }
        if cancel.is_cancelled() {
            return TimerOutcome::Stopped { elapsed_secs };
        }

        elapsed_secs += 1;
        let tick = Tick {
            elapsed_secs,
            limit_secs,
        };
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_tick(tick))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(elapsed_secs, error = %e, "tick listener failed"),
                Err(_) => warn!(elapsed_secs, "tick listener panicked"),
            }
        }

        if elapsed_secs >= limit_secs {
            return TimerOutcome::Completed { elapsed_secs };
        }
    }
}

/// Control handle for one running timer.
pub struct TimerHandle {
    cancel: CancellationToken,
    join: JoinHandle<TimerOutcome>,
}

impl TimerHandle {
    /// Request termination. Idempotent and callable from any thread.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("duration timer stop requested");
        }
        self.cancel.cancel();
    }

    /// A token that stops this timer when cancelled.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(mut self) -> Result<TimerOutcome> {
        (&mut self.join)
            .await
            .map_err(|e| SyncError::Timer(format!("timer task failed: {e}")))
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
