//! # IMAP
//!
//! Module dedicated to the IMAP push bridge. It maintains one
//! authenticated session per active user, shared between user-driven
//! operations and the idle mode, and translates push notices into
//! events.
//!
//! The protocol itself is hidden behind the [`ImapConnector`] and
//! [`ImapConnection`] traits. The `imap` cargo feature provides a
//! real implementation in the [`client`] module.
//!
//! The main entities are:
//!
//! - [`ImapSession`]: one user's connection, guarded by a lock and
//!   recovering transparently from closed connections.
//! - [`IdleWorker`](watch::IdleWorker): the state machine driving the
//!   idle mode of a session.
//! - [`ImapBridge`]: the pool of sessions, one per user.
//! - [`ImapMessageStorage`]: the message storage backed by the
//!   watched mailbox.

pub mod bridge;
#[cfg(feature = "imap")]
pub mod client;
pub mod config;
mod error;
pub mod label;
pub mod session;
pub mod storage;
pub mod watch;

use std::fmt;

use async_trait::async_trait;

#[doc(inline)]
pub use self::{
    bridge::ImapBridge,
    config::{ImapConfig, ImapEncryptionKind, ImapWatchConfig},
    error::{Error, Result},
    session::ImapSession,
    storage::{ImapConversations, ImapMessageStorage},
};
use crate::entity::{label as labels, EmailAddress, Message};

pub const SEEN: &str = "\\Seen";
pub const FLAGGED: &str = "\\Flagged";
pub const DELETED: &str = "\\Deleted";

/// Alias for a boxed, connected IMAP client.
pub type ImapClient = Box<dyn ImapConnection>;

/// The IMAP credentials.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl ToString, password: impl ToString) -> Self {
        Self {
            login: login.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The status of a selected mailbox.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MailboxStatus {
    /// The number of messages in the mailbox.
    pub exists: u32,
    /// The UID the next appended message will get, if announced by
    /// the server.
    pub uid_next: Option<u32>,
}

/// The unsolicited notice sent by the server while idling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Notice {
    /// The number of messages increased to the given sequence
    /// number.
    Exists(u32),
    /// The message with the given sequence number has been removed.
    Expunge(u32),
    Recent(u32),
    Other,
}

/// A message as fetched from the server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    pub size: u64,
    /// Unix timestamp of the internal date.
    pub time: i64,
    pub subject: String,
    pub sender: EmailAddress,
    pub to_list: Vec<EmailAddress>,
    pub cc_list: Vec<EmailAddress>,
    pub bcc_list: Vec<EmailAddress>,
    /// The full RFC 822 message.
    pub raw: Vec<u8>,
}

impl RemoteMessage {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    /// Build the message snapshot of the given mailbox.
    ///
    /// The UID is used both as message and conversation identifier:
    /// IMAP messages are not threaded.
    pub fn into_message(self, mailbox: &str) -> Message {
        let id = self.uid.to_string();

        let mut label_ids = vec![label::mailbox_label(mailbox)];
        if self.has_flag(FLAGGED) {
            label_ids.push(labels::STARRED.to_owned());
        }

        let raw = String::from_utf8_lossy(&self.raw);
        let (header, body) = match raw.find("\r\n\r\n") {
            Some(pos) => (&raw[..pos + 2], &raw[pos + 4..]),
            None => match raw.find("\n\n") {
                Some(pos) => (&raw[..pos + 1], &raw[pos + 2..]),
                None => (raw.as_ref(), ""),
            },
        };

        Message {
            conversation_id: id.clone(),
            id,
            label_ids,
            unread: !self.has_flag(SEEN),
            subject: self.subject,
            sender: self.sender,
            to_list: self.to_list,
            cc_list: self.cc_list,
            bcc_list: self.bcc_list,
            time: self.time,
            size: self.size,
            header: header.to_owned(),
            body: body.to_owned(),
            ..Default::default()
        }
    }
}

/// The IMAP connector.
///
/// Opens new authenticated connections, used both for first logins
/// and for reconnections.
#[async_trait]
pub trait ImapConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<ImapClient>;
}

/// An authenticated IMAP connection.
///
/// Every method maps to one IMAP command, except
/// [`ImapConnection::poll_notices`]. Implementations must return
/// [`Error::ConnectionClosedError`] when the connection has been
/// closed by the server.
#[async_trait]
pub trait ImapConnection: Send {
    async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus>;

    /// Enter the idle mode.
    async fn idle(&mut self) -> Result<()>;

    /// Leave the idle mode.
    async fn done(&mut self) -> Result<()>;

    /// Collect the notices received while idling, without blocking
    /// longer than a short read window.
    async fn poll_notices(&mut self) -> Result<Vec<Notice>>;

    /// Resolve the UID of the message at the given sequence number.
    async fn fetch_uid(&mut self, seq: u32) -> Result<u32>;

    /// Fetch the messages matching the given UID set.
    async fn fetch_messages(&mut self, uids: &str) -> Result<Vec<RemoteMessage>>;

    /// Append the given raw message, and return its UID.
    async fn append(&mut self, mailbox: &str, raw: &[u8], flags: &[&str]) -> Result<u32>;

    /// Add (or remove) the given flags to the messages matching the
    /// given UID set.
    async fn store_flags(&mut self, uids: &str, flags: &[&str], add: bool) -> Result<()>;

    /// Permanently remove the messages matching the given UID set
    /// and flagged as deleted.
    async fn uid_expunge(&mut self, uids: &str) -> Result<()>;

    async fn noop(&mut self) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use crate::entity::{label, EmailAddress};

    use super::{Credentials, RemoteMessage};

    #[test]
    fn redact_password() {
        let credentials = Credentials::new("alice", "secret");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn remote_message_into_message() {
        let remote = RemoteMessage {
            uid: 42,
            flags: vec!["\\Flagged".into()],
            subject: "Hello".into(),
            sender: EmailAddress::from("alice@localhost"),
            raw: b"Subject: Hello\r\nFrom: alice@localhost\r\n\r\nHello, world!".to_vec(),
            ..Default::default()
        };

        let message = remote.into_message("Junk");

        assert_eq!(message.id, "42");
        assert_eq!(message.conversation_id, "42");
        assert_eq!(message.label_ids, vec![label::SPAM, label::STARRED]);
        assert!(message.unread);
        assert_eq!(message.header, "Subject: Hello\r\nFrom: alice@localhost\r\n");
        assert_eq!(message.body, "Hello, world!");
    }
}
