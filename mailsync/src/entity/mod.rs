//! # Entity module
//!
//! Module dedicated to the snapshots exchanged between storages and
//! clients: [`Message`], [`Conversation`], [`Contact`], [`Label`] and
//! [`Address`].
//!
//! Mutations are expressed with sparse updates ([`MessageUpdate`],
//! [`ContactUpdate`], [`LabelUpdate`], [`AddressUpdate`]): only fields
//! set to `Some` are applied.

pub mod address;
pub mod contact;
pub mod conversation;
pub mod count;
pub mod label;
pub mod message;

use std::fmt;

#[doc(inline)]
pub use self::{
    address::{Address, AddressStatus, AddressUpdate},
    contact::{Contact, ContactEmail, ContactUpdate},
    conversation::{Conversation, ConversationLabel},
    count::MessageCount,
    label::{Label, LabelKind, LabelUpdate},
    message::{Message, MessageUpdate},
};

/// An entity identified by a unique string.
pub trait Entity: Clone + Send + Sync {
    /// Return the identifier of the entity.
    fn id(&self) -> &str;
}

/// Generate a new random entity identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// An email address with an optional display name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl EmailAddress {
    pub fn new(name: Option<impl ToString>, address: impl ToString) -> Self {
        Self {
            name: name.map(|name| name.to_string()),
            address: address.to_string(),
        }
    }
}

impl From<&str> for EmailAddress {
    fn from(address: &str) -> Self {
        Self {
            name: None,
            address: address.to_owned(),
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}
