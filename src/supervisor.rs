//! Task supervisor: the state machine behind every start intent.
//!
//! All intents, stops, timer completions, alarm firings and drain reports
//! arrive as [`SupervisorCommand`]s on one channel and are applied one at a
//! time by [`TaskSupervisor::run`]. At most one drain task exists at a
//! time. Nothing here is global; everything the supervisor touches comes in
//! through [`SupervisorContext`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StudySyncConfig;
use crate::error::{Result, SyncError};
use crate::notify::{Notice, NotificationSurface, RECORDING_NOTICE_ID, SYNC_NOTICE_ID};
use crate::platform::{AlarmHost, WakeLock, WakeLockGuard};
use crate::queue::OfflineQueue;
use crate::reminder::{ProgressForwarder, ReminderSink};
use crate::sync::{Collaborators, DrainReport, SyncDispatcher};
use crate::timer::{CompletionHook, DurationTimer, Tick, TickListener, TimerHandle, TimerOutcome};
use crate::wake::WakeScheduler;

const RECORDING_LOCK_TAG: &str = "studysync:recording";
const SYNC_LOCK_TAG: &str = "studysync:sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Stopped,
    Arming,
    Running,
    Syncing,
}

/// Why the host started (or woke) the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartIntent {
    TimedRecording { limit_secs: u64 },
    SyncDrain,
    AlarmFired,
}

/// What a start intent did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Recording {
        run_id: u64,
        limit_secs: u64,
        wake_at: Option<DateTime<Utc>>,
    },
    Drained(DrainReport),
    Rearmed { wake_at: Option<DateTime<Utc>> },
    /// The intent did not apply to the current state.
    Ignored,
}

/// Snapshot of the supervisor for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub run_id: Option<u64>,
    pub elapsed_secs: Option<u64>,
    pub limit_secs: Option<u64>,
    pub wake_at: Option<DateTime<Utc>>,
    /// A drain task is outstanding (possibly cancelled and winding down).
    pub draining: bool,
}

pub enum SupervisorCommand {
    Start {
        intent: StartIntent,
        reply: oneshot::Sender<StartOutcome>,
    },
    Stop {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    TimerFinished {
        run_id: u64,
        outcome: TimerOutcome,
    },
    /// Posted by the drain task; hands the dispatcher back.
    DrainFinished {
        dispatcher: SyncDispatcher,
        report: DrainReport,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Reply to a command that is already queued on the supervisor channel.
pub struct PendingReply<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingReply<T> {
    pub async fn recv(self) -> Result<T> {
        self.rx
            .await
            .map_err(|e| SyncError::Channel(format!("supervisor reply dropped: {e}")))
    }
}

/// Cloneable sender side of the supervisor's command channel.
///
/// The `submit_*` methods queue a command and return without waiting, so
/// callers can keep command order while awaiting replies elsewhere.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorCommand>,
}

/// Create the command channel. Build the handle first so collaborators
/// that call back into the supervisor (the alarm host) can hold a clone.
#[must_use]
pub fn channel() -> (SupervisorHandle, mpsc::UnboundedReceiver<SupervisorCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SupervisorHandle { tx }, rx)
}

impl SupervisorHandle {
    pub async fn start(&self, intent: StartIntent) -> Result<StartOutcome> {
        self.submit_start(intent)?.recv().await
    }

    pub fn submit_start(&self, intent: StartIntent) -> Result<PendingReply<StartOutcome>> {
        self.submit(|reply| SupervisorCommand::Start { intent, reply })
    }

    /// Stop whatever is running, including an in-flight drain.
    pub async fn stop(&self) -> Result<SupervisorStatus> {
        self.submit_stop()?.recv().await
    }

    pub fn submit_stop(&self) -> Result<PendingReply<SupervisorStatus>> {
        self.submit(|reply| SupervisorCommand::Stop { reply })
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        self.submit_status()?.recv().await
    }

    pub fn submit_status(&self) -> Result<PendingReply<SupervisorStatus>> {
        self.submit(|reply| SupervisorCommand::Status { reply })
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.submit_shutdown()?.recv().await
    }

    pub fn submit_shutdown(&self) -> Result<PendingReply<()>> {
        self.submit(|reply| SupervisorCommand::Shutdown { reply })
    }

    /// Deliver an alarm firing without waiting for the result. Safe to call
    /// from a synchronous callback.
    pub fn alarm_fired(&self) {
        let (reply, _ignored) = oneshot::channel();
        let command = SupervisorCommand::Start {
            intent: StartIntent::AlarmFired,
            reply,
        };
        if self.tx.send(command).is_err() {
            debug!("wake alarm fired after supervisor shut down");
        }
    }

    fn timer_finished(&self, run_id: u64, outcome: TimerOutcome) {
        if self
            .tx
            .send(SupervisorCommand::TimerFinished { run_id, outcome })
            .is_err()
        {
            debug!(run_id, "timer finished after supervisor shut down");
        }
    }

    fn drain_finished(&self, dispatcher: SyncDispatcher, report: DrainReport) {
        if self
            .tx
            .send(SupervisorCommand::DrainFinished { dispatcher, report })
            .is_err()
        {
            debug!("drain finished after supervisor shut down");
        }
    }

    fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> Result<PendingReply<T>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|e| SyncError::Channel(format!("supervisor is not running: {e}")))?;
        Ok(PendingReply { rx })
    }
}

/// Everything the supervisor needs from the outside world.
pub struct SupervisorContext {
    pub queue: Arc<OfflineQueue>,
    pub collaborators: Collaborators,
    pub notifier: Arc<dyn NotificationSurface>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub alarm_host: Arc<dyn AlarmHost>,
    pub config: StudySyncConfig,
}

struct ActiveRun {
    run_id: u64,
    limit_secs: u64,
    elapsed: Arc<AtomicU64>,
    timer: TimerHandle,
    _wake_lock: Option<WakeLockGuard>,
}

/// The one drain task currently owned by the supervisor.
struct ActiveDrain {
    cancel: CancellationToken,
    waiters: Vec<oneshot::Sender<StartOutcome>>,
    /// Sync requests that arrived after `cancel` fired; they get a new drain.
    queued: Vec<oneshot::Sender<StartOutcome>>,
    wake_lock: Option<WakeLockGuard>,
}

impl ActiveDrain {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Mirrors the latest tick count for status queries.
struct ElapsedTracker(Arc<AtomicU64>);

impl TickListener for ElapsedTracker {
    fn on_tick(&self, tick: Tick) -> Result<()> {
        self.0.store(tick.elapsed_secs, Ordering::Relaxed);
        Ok(())
    }
}

pub struct TaskSupervisor {
    notifier: Arc<dyn NotificationSurface>,
    wake_lock: Arc<dyn WakeLock>,
    wake: WakeScheduler,
    /// `None` while a drain task holds it.
    dispatcher: Option<SyncDispatcher>,
    handle: SupervisorHandle,
    reminder_interval: u64,
    recording_notice: Notice,
    sync_notice: Notice,
    reminder_notice: Notice,
    state: SupervisorState,
    run: Option<ActiveRun>,
    drain: Option<ActiveDrain>,
    next_run_id: u64,
}

impl TaskSupervisor {
    #[must_use]
    pub fn new(ctx: SupervisorContext, handle: SupervisorHandle) -> Self {
        let texts = &ctx.config.notifications;
        let recording_notice = Notice::new(&texts.project_name, &texts.recording_text)
            .with_ticker(&texts.recording_ticker);
        let sync_notice = Notice::new(&texts.project_name, &texts.sync_text);
        let reminder_notice = Notice::new(&texts.project_name, &texts.reminder_text);

        let dispatcher = SyncDispatcher::new(ctx.queue, ctx.collaborators)
            .with_unrecognized_policy(ctx.config.sync.unrecognized_destination);

        Self {
            wake: WakeScheduler::from_config(ctx.alarm_host, &ctx.config.wake),
            notifier: ctx.notifier,
            wake_lock: ctx.wake_lock,
            dispatcher: Some(dispatcher),
            handle,
            reminder_interval: ctx.config.timer.reminder_interval_ticks,
            recording_notice,
            sync_notice,
            reminder_notice,
            state: SupervisorState::Stopped,
            run: None,
            drain: None,
            next_run_id: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Apply commands until the channel closes or a shutdown arrives.
    ///
    /// Drains run on their own task and report back with
    /// [`SupervisorCommand::DrainFinished`], so stops, timer completions and
    /// alarms are applied while a send is still outstanding.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SupervisorCommand>) {
        info!("task supervisor started");
        while let Some(command) = rx.recv().await {
            match command {
                SupervisorCommand::Start { intent, reply } => self.start(intent, reply),
                SupervisorCommand::Stop { reply } => {
                    let _ = reply.send(self.stop());
                }
                SupervisorCommand::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                SupervisorCommand::TimerFinished { run_id, outcome } => {
                    self.handle_timer_finished(run_id, outcome);
                }
                SupervisorCommand::DrainFinished { dispatcher, report } => {
                    self.handle_drain_finished(dispatcher, report);
                }
                SupervisorCommand::Shutdown { reply } => {
                    self.cancel_drain();
                    self.teardown();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        self.cancel_drain();
        self.teardown();
        info!("task supervisor stopped");
    }

    /// Apply a start intent. Recording and alarm intents reply at once; a
    /// sync request replies when its drain ends.
    pub fn start(&mut self, intent: StartIntent, reply: oneshot::Sender<StartOutcome>) {
        debug!(?intent, state = ?self.state, "start intent");
        match intent {
            StartIntent::TimedRecording { limit_secs } => {
                let _ = reply.send(self.start_recording(limit_secs));
            }
            StartIntent::SyncDrain => self.request_sync(reply),
            StartIntent::AlarmFired => {
                let _ = reply.send(self.rearm());
            }
        }
    }

    /// Explicit stop. Cancels an in-flight drain and ends the timed session.
    /// Idempotent.
    pub fn stop(&mut self) -> SupervisorStatus {
        if self.state == SupervisorState::Stopped {
            debug!("stop requested while already stopped");
        } else {
            info!(state = ?self.state, "stop requested");
        }
        self.cancel_drain();
        self.teardown();
        self.status()
    }

    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state,
            run_id: self.run.as_ref().map(|run| run.run_id),
            elapsed_secs: self
                .run
                .as_ref()
                .map(|run| run.elapsed.load(Ordering::Relaxed)),
            limit_secs: self.run.as_ref().map(|run| run.limit_secs),
            wake_at: self.wake.pending(),
            draining: self.drain.is_some(),
        }
    }

    pub fn handle_timer_finished(&mut self, run_id: u64, outcome: TimerOutcome) {
        match &self.run {
            Some(run) if run.run_id == run_id => {
                info!(run_id, ?outcome, "timed session finished");
                self.teardown();
            }
            _ => debug!(run_id, ?outcome, "ignoring completion of superseded run"),
        }
    }

    /// Take back the dispatcher, release the sync resources and answer
    /// everyone waiting on the drain.
    pub fn handle_drain_finished(&mut self, dispatcher: SyncDispatcher, report: DrainReport) {
        self.dispatcher = Some(dispatcher);
        let Some(drain) = self.drain.take() else {
            debug!("drain report arrived with no drain active");
            return;
        };

        drop(drain.wake_lock);
        self.notifier.clear_ongoing(SYNC_NOTICE_ID);
        info!(
            sent = report.sent,
            dropped = report.dropped,
            outcome = ?report.outcome,
            "sync drain finished"
        );
        for waiter in drain.waiters {
            let _ = waiter.send(StartOutcome::Drained(report.clone()));
        }
        self.settle_state();

        if !drain.queued.is_empty() {
            self.begin_drain(drain.queued);
        }
    }

    /// Start a timed session, replacing any running one.
    pub fn start_recording(&mut self, limit_secs: u64) -> StartOutcome {
        if let Some(previous) = &self.run {
            info!(
                run_id = previous.run_id,
                "new timed session replaces the running one"
            );
            self.teardown();
        }
        self.state = SupervisorState::Arming;

        let guard = self.acquire_wake_lock(RECORDING_LOCK_TAG);
        self.notifier
            .show_ongoing(RECORDING_NOTICE_ID, &self.recording_notice);

        self.next_run_id += 1;
        let run_id = self.next_run_id;
        let elapsed = Arc::new(AtomicU64::new(0));
        let timer = DurationTimer::new()
            .with_listener(Arc::new(
                ReminderSink::new(Arc::clone(&self.notifier), self.reminder_notice.clone())
                    .with_interval(self.reminder_interval),
            ))
            .with_listener(Arc::new(ProgressForwarder::new(Arc::clone(&self.notifier))))
            .with_listener(Arc::new(ElapsedTracker(Arc::clone(&elapsed))));

        let handle = self.handle.clone();
        let on_finish: CompletionHook =
            Box::new(move |outcome| handle.timer_finished(run_id, outcome));
        let timer = timer.start(limit_secs, Some(on_finish));
        let wake_at = self.wake.arm();

        self.run = Some(ActiveRun {
            run_id,
            limit_secs,
            elapsed,
            timer,
            _wake_lock: guard,
        });
        self.settle_state();
        info!(run_id, limit_secs, ?wake_at, "timed session running");

        StartOutcome::Recording {
            run_id,
            limit_secs,
            wake_at,
        }
    }

    /// Re-arm the wake alarm for the running session; stale alarms are
    /// ignored.
    pub fn rearm(&mut self) -> StartOutcome {
        if self.run.is_none() {
            debug!(state = ?self.state, "stale wake alarm; nothing to re-arm");
            return StartOutcome::Ignored;
        }
        self.state = SupervisorState::Arming;
        let wake_at = self.wake.arm();
        self.settle_state();
        StartOutcome::Rearmed { wake_at }
    }

    fn request_sync(&mut self, reply: oneshot::Sender<StartOutcome>) {
        match self.drain.as_mut() {
            Some(drain) if drain.is_live() => {
                debug!("sync requested while draining; sharing the active drain");
                drain.waiters.push(reply);
            }
            Some(drain) => {
                debug!("sync requested while a cancelled drain winds down");
                drain.queued.push(reply);
            }
            None => self.begin_drain(vec![reply]),
        }
    }

    fn begin_drain(&mut self, waiters: Vec<oneshot::Sender<StartOutcome>>) {
        let Some(mut dispatcher) = self.dispatcher.take() else {
            warn!("sync dispatcher is busy; sync request ignored");
            for waiter in waiters {
                let _ = waiter.send(StartOutcome::Ignored);
            }
            return;
        };

        let wake_lock = self.acquire_wake_lock(SYNC_LOCK_TAG);
        self.notifier.show_ongoing(SYNC_NOTICE_ID, &self.sync_notice);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let report = dispatcher.drain_until(&token).await;
            handle.drain_finished(dispatcher, report);
        });

        self.drain = Some(ActiveDrain {
            cancel,
            waiters,
            queued: Vec::new(),
            wake_lock,
        });
        self.settle_state();
        debug!(state = ?self.state, "sync drain task spawned");
    }

    fn cancel_drain(&self) {
        if let Some(drain) = &self.drain {
            if drain.is_live() {
                info!("cancelling in-flight sync drain");
            }
            drain.cancel.cancel();
        }
    }

    fn acquire_wake_lock(&self, tag: &str) -> Option<WakeLockGuard> {
        match WakeLockGuard::acquire(Arc::clone(&self.wake_lock), tag) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(tag, error = %e, "wake lock unavailable; continuing without it");
                None
            }
        }
    }

    /// A live timed session means `Running`; otherwise a live drain means
    /// `Syncing`.
    fn settle_state(&mut self) {
        self.state = if self.run.is_some() {
            SupervisorState::Running
        } else if self.drain.as_ref().is_some_and(ActiveDrain::is_live) {
            SupervisorState::Syncing
        } else {
            SupervisorState::Stopped
        };
    }

    fn teardown(&mut self) {
        if let Some(run) = self.run.take() {
            run.timer.stop();
            self.wake.disarm();
            self.notifier.clear_ongoing(RECORDING_NOTICE_ID);
            debug!(run_id = run.run_id, "timed session torn down");
        }
        self.settle_state();
    }
}
