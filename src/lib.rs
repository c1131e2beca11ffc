//! studysync: offline-resilient task execution and sync for a study app.
//!
//! The host shell starts the subsystem with one of three intents:
//! - **Timed recording**: a [`timer::DurationTimer`] counts a session up to
//!   its limit, raising periodic reminders, while a
//!   [`wake::WakeScheduler`] keeps a wake alarm pending.
//! - **Sync**: a [`sync::SyncDispatcher`] replays the
//!   [`queue::OfflineQueue`] through the network collaborators in order.
//! - **Alarm fired**: the wake alarm is re-armed if a session is running.
//!
//! [`supervisor::TaskSupervisor`] owns the state machine and the wake lock;
//! [`host`] exposes it to native shells over a versioned JSON contract.

pub mod config;
pub mod error;
pub mod host;
pub mod notify;
pub mod platform;
pub mod queue;
pub mod reminder;
pub mod studysync_dirs;
pub mod supervisor;
pub mod sync;
pub mod timer;
pub mod wake;

pub use config::StudySyncConfig;
pub use error::{Result, SyncError};
pub use queue::{DestinationKind, HttpMethod, OfflineQueue, PendingOperation};
pub use supervisor::{StartIntent, SupervisorHandle, SupervisorState, TaskSupervisor};
pub use sync::{DrainOutcome, SyncDispatcher};
pub use timer::{DurationTimer, TimerHandle, TimerOutcome};
