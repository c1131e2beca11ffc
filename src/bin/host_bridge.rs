//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! drives the task supervisor and offline queue, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! Tracing goes to stderr and a daily log file so that stdout remains a
//! clean JSON protocol channel.

use std::sync::Arc;

use studysync::config::StudySyncConfig;
use studysync::host::command_channel;
use studysync::host::stdio::run_stdio_bridge;
use studysync::notify::EventNotifier;
use studysync::platform::{AlarmHost, NoopWakeLock, TokioAlarmHost, UnsupportedAlarmHost};
use studysync::queue::OfflineQueue;
use studysync::supervisor::{self, SupervisorContext, TaskSupervisor};
use studysync::sync::{Collaborators, HttpCollaborator, StaticCredentials};
use tokio::sync::broadcast;
use tracing_subscriber::prelude::*;

const REQUEST_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let logs_dir = studysync::studysync_dirs::logs_dir();
    let (file_layer, guard) = match std::fs::create_dir_all(&logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&logs_dir, "studysync-host.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("studysync-host: log directory unavailable ({e}); logging to stderr only");
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn env_credential(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();
    tracing::info!("studysync-host starting");

    let config_path = StudySyncConfig::default_config_path();
    let config = StudySyncConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", config_path.display()))?;

    let queue = Arc::new(OfflineQueue::open(&config.queue.root_dir)?);
    tracing::info!(
        root = %queue.root().display(),
        pending = queue.len()?,
        "offline queue opened"
    );

    let credentials = Arc::new(StaticCredentials {
        auth_token: env_credential("STUDYSYNC_AUTH_TOKEN"),
        user_id: env_credential("STUDYSYNC_USER_ID"),
    });
    let collaborators = Collaborators {
        user_profile: Arc::new(HttpCollaborator::registration(&config.sync, credentials)?),
        study_response: Arc::new(HttpCollaborator::response(&config.sync)?),
    };

    let (event_tx, _event_rx) = broadcast::channel(EVENT_CAPACITY);
    let (handle, commands) = supervisor::channel();

    let alarm_host: Arc<dyn AlarmHost> = if config.wake.exact_alarms {
        let on_fire = handle.clone();
        Arc::new(TokioAlarmHost::new(Arc::new(move || on_fire.alarm_fired())))
    } else {
        Arc::new(UnsupportedAlarmHost)
    };

    let ctx = SupervisorContext {
        queue: Arc::clone(&queue),
        collaborators,
        notifier: Arc::new(EventNotifier::new(event_tx.clone())),
        wake_lock: Arc::new(NoopWakeLock),
        alarm_host,
        config,
    };
    let supervisor_task = tokio::spawn(TaskSupervisor::new(ctx, handle.clone()).run(commands));

    let (client, server) = command_channel(REQUEST_CAPACITY, event_tx, handle.clone(), queue);
    let bridge_result = run_stdio_bridge(client, server).await;

    // Already gone after `runtime.stop`.
    if handle.shutdown().await.is_err() {
        tracing::debug!("supervisor already shut down");
    }
    if let Err(e) = supervisor_task.await {
        tracing::error!(error = %e, "supervisor task failed");
    }

    bridge_result.map_err(|e| {
        tracing::error!(error = %e, "studysync-host exited with error");
        anyhow::anyhow!("studysync-host failed: {e}")
    })?;

    tracing::info!("studysync-host shut down cleanly");
    Ok(())
}
