//! Centralized application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Environment Overrides
//!
//! - `STUDYSYNC_DATA_DIR` — overrides [`data_dir`]
//! - `STUDYSYNC_CONFIG_DIR` — overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the offline queue database and logs. Resolves to
/// `dirs::data_dir()/studysync/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("STUDYSYNC_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("studysync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/studysync-data"))
}

/// Application config directory (`config.toml`).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("STUDYSYNC_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("studysync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/studysync-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Offline queue directory (`data_dir()/queue/`).
#[must_use]
pub fn queue_dir() -> PathBuf {
    data_dir().join("queue")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_dirs_live_under_data_dir() {
        let data = data_dir();
        assert!(logs_dir().starts_with(&data));
        assert!(queue_dir().starts_with(&data));
        assert!(logs_dir().ends_with("logs"));
    }
}
