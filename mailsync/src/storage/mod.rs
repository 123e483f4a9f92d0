//! # Storage
//!
//! Module dedicated to the storage contracts. Each entity kind has
//! its own small trait, so that backings can be mixed: messages can
//! live on an IMAP server while contacts live in memory.
//!
//! Storage errors are returned as [`AnyBoxedError`](crate::AnyBoxedError)
//! and are never reshaped by the layers above.
//!
//! The [`Storage`] struct composes one implementation per kind.

mod error;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    memory::MemoryStorage,
};
use crate::{
    entity::{
        Address, AddressUpdate, Contact, ContactUpdate, Conversation, Label, LabelUpdate, Message,
        MessageCount, MessageUpdate,
    },
    user::UserId,
    AnyResult,
};

#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Insert the given message.
    ///
    /// Returns the stored snapshot, which may differ from the given
    /// one (generated identifier, normalized labels etc).
    async fn insert_message(&self, user: &UserId, message: Message) -> AnyResult<Message>;

    /// Apply the given sparse update, and return the post-update
    /// snapshot.
    async fn update_message(&self, user: &UserId, update: MessageUpdate) -> AnyResult<Message>;

    async fn delete_message(&self, user: &UserId, id: &str) -> AnyResult<()>;

    async fn get_message(&self, user: &UserId, id: &str) -> AnyResult<Message>;

    async fn list_messages(&self, user: &UserId) -> AnyResult<Vec<Message>>;

    /// Count messages per label.
    async fn count_messages(&self, user: &UserId) -> AnyResult<Vec<MessageCount>> {
        let messages = self.list_messages(user).await?;
        Ok(MessageCount::from_messages(&messages))
    }
}

/// The conversation storage.
///
/// Conversations are aggregates derived from their messages, they
/// can only be read.
#[async_trait]
pub trait ConversationStorage: Send + Sync {
    /// Find the conversation matching the given identifier.
    ///
    /// A conversation without any message does not exist anymore.
    async fn find_conversation(&self, user: &UserId, id: &str) -> AnyResult<Option<Conversation>>;

    async fn list_conversations(&self, user: &UserId) -> AnyResult<Vec<Conversation>>;

    /// Count conversations per label.
    async fn count_conversations(&self, user: &UserId) -> AnyResult<Vec<MessageCount>> {
        let conversations = self.list_conversations(user).await?;
        Ok(MessageCount::from_conversations(&conversations))
    }
}

#[async_trait]
pub trait ContactStorage: Send + Sync {
    async fn insert_contact(&self, user: &UserId, contact: Contact) -> AnyResult<Contact>;
    async fn update_contact(&self, user: &UserId, update: ContactUpdate) -> AnyResult<Contact>;
    async fn delete_contact(&self, user: &UserId, id: &str) -> AnyResult<()>;
    async fn get_contact(&self, user: &UserId, id: &str) -> AnyResult<Contact>;
    async fn list_contacts(&self, user: &UserId) -> AnyResult<Vec<Contact>>;
}

#[async_trait]
pub trait LabelStorage: Send + Sync {
    async fn insert_label(&self, user: &UserId, label: Label) -> AnyResult<Label>;
    async fn update_label(&self, user: &UserId, update: LabelUpdate) -> AnyResult<Label>;
    async fn delete_label(&self, user: &UserId, id: &str) -> AnyResult<()>;
    async fn get_label(&self, user: &UserId, id: &str) -> AnyResult<Label>;
    async fn list_labels(&self, user: &UserId) -> AnyResult<Vec<Label>>;
}

#[async_trait]
pub trait AddressStorage: Send + Sync {
    async fn insert_address(&self, user: &UserId, address: Address) -> AnyResult<Address>;
    async fn update_address(&self, user: &UserId, update: AddressUpdate) -> AnyResult<Address>;
    async fn delete_address(&self, user: &UserId, id: &str) -> AnyResult<()>;
    async fn get_address(&self, user: &UserId, id: &str) -> AnyResult<Address>;
    async fn list_addresses(&self, user: &UserId) -> AnyResult<Vec<Address>>;
}

/// The storage composition.
///
/// Holds one implementation per entity kind. Use
/// [`Storage::observed`](crate::observer) to get a copy emitting
/// events on every successful mutation.
#[derive(Clone)]
pub struct Storage {
    pub messages: Arc<dyn MessageStorage>,
    pub conversations: Arc<dyn ConversationStorage>,
    pub contacts: Arc<dyn ContactStorage>,
    pub labels: Arc<dyn LabelStorage>,
    pub addresses: Arc<dyn AddressStorage>,
}

impl Storage {
    /// Build a storage where every kind is backed by the same
    /// in-memory store.
    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStorage::new()))
    }

    pub fn from_memory(memory: Arc<MemoryStorage>) -> Self {
        Self {
            messages: memory.clone(),
            conversations: memory.clone(),
            contacts: memory.clone(),
            labels: memory.clone(),
            addresses: memory,
        }
    }

    pub fn with_messages(mut self, messages: Arc<dyn MessageStorage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_conversations(mut self, conversations: Arc<dyn ConversationStorage>) -> Self {
        self.conversations = conversations;
        self
    }

    pub fn with_contacts(mut self, contacts: Arc<dyn ContactStorage>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelStorage>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_addresses(mut self, addresses: Arc<dyn AddressStorage>) -> Self {
        self.addresses = addresses;
        self
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::memory()
    }
}
