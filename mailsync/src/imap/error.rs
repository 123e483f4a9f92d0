use std::{any::Any, io, num::ParseIntError, result};

use thiserror::Error;
use tokio::task::JoinError;

use crate::{user::UserId, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find IMAP session for user {0}: login first")]
    SessionUnavailableError(UserId),
    #[error("cannot connect to IMAP server {1}:{2}")]
    ConnectError(#[source] io::Error, String, u16),
    #[error("cannot authenticate to IMAP server as {1}: {0}")]
    LoginError(String, String),
    #[error("cannot execute IMAP command: connection closed")]
    ConnectionClosedError,
    #[error("cannot execute IMAP command {0}: {1}")]
    ExecuteCommandError(String, String),
    #[error("cannot run blocking IMAP command")]
    JoinCommandError(#[source] JoinError),

    #[error("cannot parse system mailbox kind {0}")]
    ParseMailboxKindError(String),
    #[error("cannot parse IMAP message id {1}")]
    ParseMessageIdError(#[source] ParseIntError, String),
    #[error("cannot find IMAP message with UID {0}")]
    MessageNotFoundError(u32),
    #[error("cannot find UID of IMAP message {0}")]
    FindUidError(u32),
    #[error("cannot find UID of appended IMAP message")]
    FindAppendedMessageUidError,
    #[error("cannot build IMAP message")]
    BuildMessageError(#[source] io::Error),
    #[error("cannot update IMAP message {0}: only labels and unread flag can be changed")]
    UpdateMessageFieldsError(String),
}

impl Error {
    /// Return `true` if the error means the connection is lost, in
    /// which case reconnecting may help.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosedError)
    }
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}
