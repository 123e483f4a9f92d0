//! # Sync configuration
//!
//! Module dedicated to the event log configuration. Every option is
//! optional and expressed in seconds, the `find_*` getters resolve
//! them to their default value.

use std::time::Duration;

/// Default time a client blocks while waiting for the next event.
pub const DEFAULT_SYNC_TIMEOUT: u64 = 5 * 60;

/// Default minimum age of a log entry before it can be trimmed.
pub const DEFAULT_EVENT_RETENTION: u64 = 10 * 60;

/// Default interval between two garbage collections of a log.
pub const DEFAULT_GC_INTERVAL: u64 = 60;

/// The sync configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct SyncConfig {
    /// The maximum time, in seconds, a client waits for a new event
    /// once it caught up with the log.
    ///
    /// Defaults to 5 minutes.
    pub sync_timeout: Option<u64>,

    /// The minimum age, in seconds, of a log entry before garbage
    /// collection can trim it.
    ///
    /// Clients polling less often than this retention will receive
    /// a not found error and need to resync from the last event.
    /// Defaults to 10 minutes.
    pub event_retention: Option<u64>,

    /// The minimum interval, in seconds, between two garbage
    /// collections of the same log.
    ///
    /// Defaults to 1 minute.
    pub gc_interval: Option<u64>,
}

impl SyncConfig {
    /// Find the sync timeout, or fall back to the default one.
    pub fn find_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout.unwrap_or(DEFAULT_SYNC_TIMEOUT))
    }

    /// Find the event retention, or fall back to the default one.
    pub fn find_event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention.unwrap_or(DEFAULT_EVENT_RETENTION))
    }

    /// Find the garbage collection interval, or fall back to the
    /// default one.
    pub fn find_gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::SyncConfig;

    #[test]
    fn find_defaults() {
        let config = SyncConfig::default();

        assert_eq!(config.find_sync_timeout(), Duration::from_secs(300));
        assert_eq!(config.find_event_retention(), Duration::from_secs(600));
        assert_eq!(config.find_gc_interval(), Duration::from_secs(60));
    }

    #[test]
    fn find_overrides() {
        let config = SyncConfig {
            sync_timeout: Some(30),
            event_retention: Some(0),
            gc_interval: Some(5),
        };

        assert_eq!(config.find_sync_timeout(), Duration::from_secs(30));
        assert_eq!(config.find_event_retention(), Duration::ZERO);
        assert_eq!(config.find_gc_interval(), Duration::from_secs(5));
    }
}
