//! # Mailbox label
//!
//! Module dedicated to the mapping between IMAP mailbox names and
//! labels. Well-known mailboxes map to system labels, matching is
//! case-insensitive. Any other mailbox name is used as is, as an ad
//! hoc label.

use std::{fmt, str::FromStr};

use super::{Error, Result};
use crate::entity::label;

/// The system mailbox kind enumeration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MailboxKind {
    Inbox,
    Drafts,
    Sent,
    Trash,
    Spam,
    Archive,
    Starred,
}

impl MailboxKind {
    /// Return the system label identifier matching the mailbox kind.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Inbox => label::INBOX,
            Self::Drafts => label::DRAFTS,
            Self::Sent => label::SENT,
            Self::Trash => label::TRASH,
            Self::Spam => label::SPAM,
            Self::Archive => label::ARCHIVE,
            Self::Starred => label::STARRED,
        }
    }
}

impl FromStr for MailboxKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let matches = |candidates: &[&str]| {
            candidates
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate))
        };

        match name {
            _ if matches(&["INBOX"]) => Ok(Self::Inbox),
            _ if matches(&["Draft", "Drafts"]) => Ok(Self::Drafts),
            _ if matches(&["Sent"]) => Ok(Self::Sent),
            _ if matches(&["Trash"]) => Ok(Self::Trash),
            _ if matches(&["Spam", "Junk"]) => Ok(Self::Spam),
            _ if matches(&["Archive", "Archives"]) => Ok(Self::Archive),
            _ if matches(&["Important", "Starred"]) => Ok(Self::Starred),
            name => Err(Error::ParseMailboxKindError(name.to_owned())),
        }
    }
}

impl fmt::Display for MailboxKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Map the given mailbox name to its label identifier.
pub fn mailbox_label(mailbox: &str) -> String {
    match mailbox.parse::<MailboxKind>() {
        Ok(kind) => kind.as_label().to_owned(),
        Err(_) => mailbox.to_owned(),
    }
}
