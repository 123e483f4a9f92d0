//! Module dedicated to the IMAP bridge configuration.

use std::{fmt, time::Duration};

/// Default time without user-driven activity before a session enters
/// the idle mode.
pub const DEFAULT_QUIESCENCE: u64 = 2;

/// Default interval between two checks for push notices.
pub const DEFAULT_POLL_INTERVAL: u64 = 1;

/// Default interval between two idle renewals.
///
/// Servers may drop an idling connection after 30 minutes, clients
/// should renew it at least every 29 minutes.
pub const DEFAULT_IDLE_RENEW: u64 = 25 * 60;

/// Default delay between two reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: u64 = 5;

/// The IMAP bridge configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ImapConfig {
    /// The IMAP server host name.
    pub host: String,

    /// The IMAP server host port.
    pub port: u16,

    /// The IMAP encryption protocol to use.
    ///
    /// Supported encryption: SSL/TLS or none. Defaults to SSL/TLS.
    #[cfg_attr(feature = "derive", serde(default))]
    pub encryption: Option<ImapEncryptionKind>,

    /// The mailbox watched for push notices, and where messages are
    /// appended.
    ///
    /// Defaults to `INBOX`.
    pub mailbox: Option<String>,

    /// The idle mode configuration.
    pub watch: Option<ImapWatchConfig>,
}

impl ImapConfig {
    /// Return `true` if encryption is disabled.
    pub fn is_encryption_disabled(&self) -> bool {
        matches!(self.encryption.as_ref(), Some(ImapEncryptionKind::None))
    }

    /// Find the watched mailbox, or fall back to `INBOX`.
    pub fn find_mailbox(&self) -> &str {
        self.mailbox.as_deref().unwrap_or("INBOX")
    }

    /// Find the idle mode configuration, or fall back to the default
    /// one.
    pub fn find_watch(&self) -> ImapWatchConfig {
        self.watch.clone().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum ImapEncryptionKind {
    #[default]
    #[cfg_attr(feature = "derive", serde(alias = "ssl"))]
    Tls,
    None,
}

impl fmt::Display for ImapEncryptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => write!(f, "SSL/TLS"),
            Self::None => write!(f, "None"),
        }
    }
}

/// The idle mode configuration.
///
/// Every option is expressed in seconds.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ImapWatchConfig {
    /// The time without user-driven activity before entering the
    /// idle mode.
    pub quiescence: Option<u64>,

    /// The interval between two checks for push notices while
    /// idling.
    pub poll_interval: Option<u64>,

    /// The interval between two idle renewals. Must stay below 29
    /// minutes.
    pub idle_renew: Option<u64>,

    /// The delay between two reconnection attempts.
    pub reconnect_delay: Option<u64>,
}

impl ImapWatchConfig {
    pub fn find_quiescence(&self) -> Duration {
        Duration::from_secs(self.quiescence.unwrap_or(DEFAULT_QUIESCENCE))
    }

    pub fn find_poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL))
    }

    pub fn find_idle_renew(&self) -> Duration {
        Duration::from_secs(self.idle_renew.unwrap_or(DEFAULT_IDLE_RENEW))
    }

    pub fn find_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay.unwrap_or(DEFAULT_RECONNECT_DELAY))
    }
}
