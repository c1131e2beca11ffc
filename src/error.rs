//! Error types for the task execution and sync subsystem.

/// Top-level error type for studysync.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Offline queue storage error.
    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    /// Network collaborator or HTTP client error.
    #[error("network error: {0}")]
    Network(String),

    /// Duration timer error.
    #[error("timer error: {0}")]
    Timer(String),

    /// Host platform capability error (wake lock, alarms).
    #[error("platform error: {0}")]
    Platform(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed or unsupported host command.
    #[error("host command error: {0}")]
    Host(String),

    /// Supervisor lifecycle error.
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;
