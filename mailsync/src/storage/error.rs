use std::{any::Any, result};

use thiserror::Error;

use crate::{user::UserId, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find message {1} for user {0}")]
    MessageNotFoundError(UserId, String),
    #[error("cannot insert message {1} for user {0}: message already exists")]
    MessageAlreadyExistsError(UserId, String),
    #[error("cannot find contact {1} for user {0}")]
    ContactNotFoundError(UserId, String),
    #[error("cannot insert contact {1} for user {0}: contact already exists")]
    ContactAlreadyExistsError(UserId, String),
    #[error("cannot find label {1} for user {0}")]
    LabelNotFoundError(UserId, String),
    #[error("cannot insert label {1} for user {0}: label already exists")]
    LabelAlreadyExistsError(UserId, String),
    #[error("cannot find address {1} for user {0}")]
    AddressNotFoundError(UserId, String),
    #[error("cannot insert address {1} for user {0}: address already exists")]
    AddressAlreadyExistsError(UserId, String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MessageNotFoundError(..)
                | Self::ContactNotFoundError(..)
                | Self::LabelNotFoundError(..)
                | Self::AddressNotFoundError(..)
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
