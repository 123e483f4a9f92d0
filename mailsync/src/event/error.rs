use std::{any::Any, result};

use thiserror::Error;

use super::EventId;
use crate::{user::UserId, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find event {1} for user {0}: resync from the last event")]
    EventNotFoundError(UserId, EventId),
    #[error("cannot wait for event {1} for user {0}: log has been deleted")]
    LogDeletedError(UserId, EventId),
}

impl Error {
    /// Return `true` if the client should resync from the last event.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EventNotFoundError(..) | Self::LogDeletedError(..)
        )
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
