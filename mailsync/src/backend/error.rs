use std::{any::Any, result};

use thiserror::Error;

use crate::{user::UserId, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot count messages for user {1}")]
    CountMessagesError(#[source] AnyBoxedError, UserId),
    #[error("cannot count conversations for user {1}")]
    CountConversationsError(#[source] AnyBoxedError, UserId),
    #[error("cannot login user {0}: IMAP is not configured")]
    ImapNotConfiguredError(UserId),
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
