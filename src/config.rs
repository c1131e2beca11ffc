//! Configuration types for the task execution and sync subsystem.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudySyncConfig {
    /// Duration timer and reminder cadence.
    pub timer: TimerConfig,
    /// Host wake alarm settings.
    pub wake: WakeConfig,
    /// Queue replay settings.
    pub sync: SyncConfig,
    /// Offline queue storage.
    pub queue: QueueConfig,
    /// User-visible notification texts.
    pub notifications: NotificationConfig,
}

/// Duration timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Raise a reminder every N ticks.
    pub reminder_interval_ticks: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            reminder_interval_ticks: crate::reminder::REMINDER_INTERVAL_TICKS,
        }
    }
}

/// Wake alarm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// How far ahead of "now" each alarm is armed, in milliseconds.
    pub lookahead_ms: u64,
    /// Whether the host supports exact (alarm-clock) wake triggers.
    ///
    /// When `false` no alarm is ever registered and timed sessions run
    /// without a wake guarantee.
    pub exact_alarms: bool,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: crate::wake::WAKE_LOOKAHEAD_MS,
            exact_alarms: true,
        }
    }
}

/// What a drain does with a queue head whose destination it cannot route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedDestinationPolicy {
    /// Leave the entry in place and end the drain.
    #[default]
    Stall,
    /// Remove the entry with a warning and keep draining.
    Drop,
}

/// Queue replay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Handling of `reserved-unused` and unknown destination kinds.
    pub unrecognized_destination: UnrecognizedDestinationPolicy,
    /// Per-request timeout for the HTTP collaborator. `0` disables it.
    pub request_timeout_secs: u64,
    /// User-Agent header sent by the HTTP collaborator.
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            unrecognized_destination: UnrecognizedDestinationPolicy::default(),
            request_timeout_secs: 0,
            user_agent: format!("studysync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Offline queue storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding `queue.db`.
    pub root_dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            root_dir: crate::studysync_dirs::queue_dir(),
        }
    }
}

/// Texts shown in ongoing and reminder notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Title used by every notification.
    pub project_name: String,
    /// Ticker shown while a timed recording runs.
    pub recording_ticker: String,
    /// Body shown while a timed recording runs.
    pub recording_text: String,
    /// Body shown while the offline queue is syncing.
    pub sync_text: String,
    /// Body of the periodic reminder.
    pub reminder_text: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            project_name: "Health Study".to_owned(),
            recording_ticker: "Activity recorder".to_owned(),
            recording_text: "Activity in progress".to_owned(),
            sync_text: "Syncing offline data".to_owned(),
            reminder_text: "Your activity is still recording. Tap to return to it.".to_owned(),
        }
    }
}

impl StudySyncConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SyncError::Config(e.to_string()))
    }

    /// Load the config at `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `config_dir()/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::studysync_dirs::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let config = StudySyncConfig::default();
        assert_eq!(config.timer.reminder_interval_ticks, 1800);
        assert_eq!(config.wake.lookahead_ms, 180_000);
        assert!(config.wake.exact_alarms);
        assert_eq!(
            config.sync.unrecognized_destination,
            UnrecognizedDestinationPolicy::Stall
        );
        assert_eq!(config.sync.request_timeout_secs, 0);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
[wake]
exact_alarms = false

[sync]
unrecognized_destination = "drop"
"#;
        let config: StudySyncConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.wake.exact_alarms);
        assert_eq!(config.wake.lookahead_ms, 180_000);
        assert_eq!(
            config.sync.unrecognized_destination,
            UnrecognizedDestinationPolicy::Drop
        );
        assert_eq!(config.notifications.sync_text, "Syncing offline data");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = StudySyncConfig::default();
        config.notifications.project_name = "Kick Counter Study".to_owned();
        config.sync.request_timeout_secs = 30;
        config.save_to_file(&path).unwrap();

        let loaded = StudySyncConfig::from_file(&path).unwrap();
        assert_eq!(loaded.notifications.project_name, "Kick Counter Study");
        assert_eq!(loaded.sync.request_timeout_secs, 30);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StudySyncConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.timer.reminder_interval_ticks, 1800);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "wake = [not toml").unwrap();
        let err = StudySyncConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Config(_)));
    }
}
