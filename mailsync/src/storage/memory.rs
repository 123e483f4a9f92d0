//! # Memory storage
//!
//! Module dedicated to the in-memory storage, implementing every
//! storage contract. It is mostly used for testing, and as a default
//! backing for kinds a remote store does not handle.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::{
    AddressStorage, ContactStorage, ConversationStorage, Error, LabelStorage, MessageStorage,
};
use crate::{
    entity::{
        new_id, Address, AddressUpdate, Contact, ContactUpdate, Conversation, Entity, Label,
        LabelUpdate, Message, MessageUpdate,
    },
    user::UserId,
    AnyResult,
};

/// The mailbox of one user.
#[derive(Debug, Default)]
struct Mailbox {
    messages: BTreeMap<String, Message>,
    contacts: BTreeMap<String, Contact>,
    labels: BTreeMap<String, Label>,
    addresses: BTreeMap<String, Address>,
}

fn insert_entity<T: Entity>(
    entities: &mut BTreeMap<String, T>,
    entity: T,
    exists: impl FnOnce(String) -> Error,
) -> AnyResult<T> {
    if entities.contains_key(entity.id()) {
        return Err(exists(entity.id().to_owned()).into());
    }

    entities.insert(entity.id().to_owned(), entity.clone());
    Ok(entity)
}

fn get_entity<T: Entity>(
    entities: &BTreeMap<String, T>,
    id: &str,
    not_found: impl FnOnce(String) -> Error,
) -> AnyResult<T> {
    match entities.get(id) {
        Some(entity) => Ok(entity.clone()),
        None => Err(not_found(id.to_owned()).into()),
    }
}

fn get_entity_mut<'a, T: Entity>(
    entities: &'a mut BTreeMap<String, T>,
    id: &str,
    not_found: impl FnOnce(String) -> Error,
) -> AnyResult<&'a mut T> {
    match entities.get_mut(id) {
        Some(entity) => Ok(entity),
        None => Err(not_found(id.to_owned()).into()),
    }
}

fn delete_entity<T: Entity>(
    entities: &mut BTreeMap<String, T>,
    id: &str,
    not_found: impl FnOnce(String) -> Error,
) -> AnyResult<()> {
    match entities.remove(id) {
        Some(_) => Ok(()),
        None => Err(not_found(id.to_owned()).into()),
    }
}

/// The in-memory storage.
///
/// Entities without identifier receive a generated one on insert.
/// Messages without conversation start their own conversation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    mailboxes: RwLock<HashMap<UserId, Mailbox>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStorage for MemoryStorage {
    async fn insert_message(&self, user: &UserId, mut message: Message) -> AnyResult<Message> {
        if message.id.is_empty() {
            message.id = new_id();
        }
        if message.conversation_id.is_empty() {
            message.conversation_id = message.id.clone();
        }

        trace!(%user, id = %message.id, "inserting message into memory");

        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        insert_entity(&mut mailbox.messages, message, |id| {
            Error::MessageAlreadyExistsError(user.clone(), id)
        })
    }

    async fn update_message(&self, user: &UserId, update: MessageUpdate) -> AnyResult<Message> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        let message = get_entity_mut(&mut mailbox.messages, &update.id, |id| {
            Error::MessageNotFoundError(user.clone(), id)
        })?;
        message.apply(update);
        Ok(message.clone())
    }

    async fn delete_message(&self, user: &UserId, id: &str) -> AnyResult<()> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        delete_entity(&mut mailbox.messages, id, |id| {
            Error::MessageNotFoundError(user.clone(), id)
        })
    }

    async fn get_message(&self, user: &UserId, id: &str) -> AnyResult<Message> {
        let mailboxes = self.mailboxes.read().await;
        match mailboxes.get(user) {
            Some(mailbox) => get_entity(&mailbox.messages, id, |id| {
                Error::MessageNotFoundError(user.clone(), id)
            }),
            None => Err(Error::MessageNotFoundError(user.clone(), id.to_owned()).into()),
        }
    }

    async fn list_messages(&self, user: &UserId) -> AnyResult<Vec<Message>> {
        let mailboxes = self.mailboxes.read().await;
        let messages = mailboxes
            .get(user)
            .map(|mailbox| mailbox.messages.values().cloned().collect())
            .unwrap_or_default();
        Ok(messages)
    }
}

#[async_trait]
impl ConversationStorage for MemoryStorage {
    async fn find_conversation(&self, user: &UserId, id: &str) -> AnyResult<Option<Conversation>> {
        let mailboxes = self.mailboxes.read().await;
        let conversation = mailboxes
            .get(user)
            .and_then(|mailbox| Conversation::from_messages(id, mailbox.messages.values()));
        Ok(conversation)
    }

    async fn list_conversations(&self, user: &UserId) -> AnyResult<Vec<Conversation>> {
        let mailboxes = self.mailboxes.read().await;
        let Some(mailbox) = mailboxes.get(user) else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<&str> = mailbox
            .messages
            .values()
            .map(|message| message.conversation_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let conversations = ids
            .into_iter()
            .filter_map(|id| Conversation::from_messages(id, mailbox.messages.values()))
            .collect();

        Ok(conversations)
    }
}

#[async_trait]
impl ContactStorage for MemoryStorage {
    async fn insert_contact(&self, user: &UserId, mut contact: Contact) -> AnyResult<Contact> {
        if contact.id.is_empty() {
            contact.id = new_id();
        }

        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        insert_entity(&mut mailbox.contacts, contact, |id| {
            Error::ContactAlreadyExistsError(user.clone(), id)
        })
    }

    async fn update_contact(&self, user: &UserId, update: ContactUpdate) -> AnyResult<Contact> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        let contact = get_entity_mut(&mut mailbox.contacts, &update.id, |id| {
            Error::ContactNotFoundError(user.clone(), id)
        })?;
        contact.apply(update);
        Ok(contact.clone())
    }

    async fn delete_contact(&self, user: &UserId, id: &str) -> AnyResult<()> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        delete_entity(&mut mailbox.contacts, id, |id| {
            Error::ContactNotFoundError(user.clone(), id)
        })
    }

    async fn get_contact(&self, user: &UserId, id: &str) -> AnyResult<Contact> {
        let mailboxes = self.mailboxes.read().await;
        match mailboxes.get(user) {
            Some(mailbox) => get_entity(&mailbox.contacts, id, |id| {
                Error::ContactNotFoundError(user.clone(), id)
            }),
            None => Err(Error::ContactNotFoundError(user.clone(), id.to_owned()).into()),
        }
    }

    async fn list_contacts(&self, user: &UserId) -> AnyResult<Vec<Contact>> {
        let mailboxes = self.mailboxes.read().await;
        let contacts = mailboxes
            .get(user)
            .map(|mailbox| mailbox.contacts.values().cloned().collect())
            .unwrap_or_default();
        Ok(contacts)
    }
}

#[async_trait]
impl LabelStorage for MemoryStorage {
    async fn insert_label(&self, user: &UserId, mut label: Label) -> AnyResult<Label> {
        if label.id.is_empty() {
            label.id = new_id();
        }

        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        insert_entity(&mut mailbox.labels, label, |id| {
            Error::LabelAlreadyExistsError(user.clone(), id)
        })
    }

    async fn update_label(&self, user: &UserId, update: LabelUpdate) -> AnyResult<Label> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        let label = get_entity_mut(&mut mailbox.labels, &update.id, |id| {
            Error::LabelNotFoundError(user.clone(), id)
        })?;
        label.apply(update);
        Ok(label.clone())
    }

    async fn delete_label(&self, user: &UserId, id: &str) -> AnyResult<()> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        delete_entity(&mut mailbox.labels, id, |id| {
            Error::LabelNotFoundError(user.clone(), id)
        })
    }

    async fn get_label(&self, user: &UserId, id: &str) -> AnyResult<Label> {
        let mailboxes = self.mailboxes.read().await;
        match mailboxes.get(user) {
            Some(mailbox) => get_entity(&mailbox.labels, id, |id| {
                Error::LabelNotFoundError(user.clone(), id)
            }),
            None => Err(Error::LabelNotFoundError(user.clone(), id.to_owned()).into()),
        }
    }

    async fn list_labels(&self, user: &UserId) -> AnyResult<Vec<Label>> {
        let mailboxes = self.mailboxes.read().await;
        let labels = mailboxes
            .get(user)
            .map(|mailbox| mailbox.labels.values().cloned().collect())
            .unwrap_or_default();
        Ok(labels)
    }
}

#[async_trait]
impl AddressStorage for MemoryStorage {
    async fn insert_address(&self, user: &UserId, mut address: Address) -> AnyResult<Address> {
        if address.id.is_empty() {
            address.id = new_id();
        }

        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        insert_entity(&mut mailbox.addresses, address, |id| {
            Error::AddressAlreadyExistsError(user.clone(), id)
        })
    }

    async fn update_address(&self, user: &UserId, update: AddressUpdate) -> AnyResult<Address> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        let address = get_entity_mut(&mut mailbox.addresses, &update.id, |id| {
            Error::AddressNotFoundError(user.clone(), id)
        })?;
        address.apply(update);
        Ok(address.clone())
    }

    async fn delete_address(&self, user: &UserId, id: &str) -> AnyResult<()> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(user.clone()).or_default();
        delete_entity(&mut mailbox.addresses, id, |id| {
            Error::AddressNotFoundError(user.clone(), id)
        })
    }

    async fn get_address(&self, user: &UserId, id: &str) -> AnyResult<Address> {
        let mailboxes = self.mailboxes.read().await;
        match mailboxes.get(user) {
            Some(mailbox) => get_entity(&mailbox.addresses, id, |id| {
                Error::AddressNotFoundError(user.clone(), id)
            }),
            None => Err(Error::AddressNotFoundError(user.clone(), id.to_owned()).into()),
        }
    }

    async fn list_addresses(&self, user: &UserId) -> AnyResult<Vec<Address>> {
        let mailboxes = self.mailboxes.read().await;
        let addresses = mailboxes
            .get(user)
            .map(|mailbox| mailbox.addresses.values().cloned().collect())
            .unwrap_or_default();
        Ok(addresses)
    }
}
