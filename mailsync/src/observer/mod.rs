//! # Mutation observer
//!
//! Module dedicated to event emission. Every storage capability can
//! be wrapped by an observed counterpart which, strictly after a
//! mutation succeeded, appends the matching [`Event`] to the user's
//! log:
//!
//! - insert emits a create delta carrying the stored snapshot,
//! - update emits an update delta carrying the post-update snapshot,
//! - delete emits a delete delta carrying only the identifier.
//!
//! Failed mutations emit nothing, and their errors are returned
//! untouched.
//!
//! Message mutations additionally emit a conversation delta, built
//! from the conversation aggregate as re-read from the storage after
//! the mutation.

use std::sync::Arc;

use async_trait::async_trait;
use paste::paste;
use tracing::{debug, warn};

use crate::{
    entity::{
        Address, AddressUpdate, Contact, ContactUpdate, Conversation, Label, LabelUpdate, Message,
        MessageCount, MessageUpdate,
    },
    event::{Delta, Event, EventId, EventStore},
    storage::{
        AddressStorage, ContactStorage, ConversationStorage, LabelStorage, MessageStorage, Storage,
    },
    user::UserId,
    AnyResult,
};

/// The event emitter.
///
/// Shared by every observed storage and by the IMAP push bridge, so
/// that client mutations and remote notices reach the log through
/// the same path.
#[derive(Clone, Debug)]
pub struct Emitter {
    events: Arc<EventStore>,
}

impl Emitter {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub async fn emit(&self, user: &UserId, event: Event) -> EventId {
        debug!(
            %user,
            messages = event.messages.len(),
            conversations = event.conversations.len(),
            "emitting event"
        );
        self.events.insert_event(user, event).await
    }
}

/// The observed message storage.
pub struct ObservedMessages {
    inner: Arc<dyn MessageStorage>,
    conversations: Arc<dyn ConversationStorage>,
    emitter: Emitter,
}

impl ObservedMessages {
    pub fn new(
        inner: Arc<dyn MessageStorage>,
        conversations: Arc<dyn ConversationStorage>,
        emitter: Emitter,
    ) -> Self {
        Self {
            inner,
            conversations,
            emitter,
        }
    }

    /// Build the delta of the given conversation, as it is after the
    /// mutation.
    ///
    /// A vanished conversation gives a delete delta. A conversation
    /// made of a single message gives a create delta when the
    /// mutation was an insertion.
    async fn conversation_delta(
        &self,
        user: &UserId,
        id: &str,
        inserted: bool,
    ) -> Option<Delta<Conversation>> {
        if id.is_empty() {
            return None;
        }

        match self.conversations.find_conversation(user, id).await {
            Ok(None) => Some(Delta::delete(id)),
            Ok(Some(conversation)) if inserted && conversation.num_messages == 1 => {
                Some(Delta::create(conversation))
            }
            Ok(Some(conversation)) => Some(Delta::update(conversation)),
            // the message mutation already succeeded, its delta must
            // still be emitted
            Err(err) => {
                warn!(%user, id, "cannot read conversation, skipping its delta: {err}");
                debug!("{err:?}");
                None
            }
        }
    }

    async fn emit(
        &self,
        user: &UserId,
        message: Delta<Message>,
        conversation: Option<Delta<Conversation>>,
    ) {
        let event = Event {
            messages: vec![message],
            conversations: conversation.into_iter().collect(),
            ..Default::default()
        };

        self.emitter.emit(user, event).await;
    }
}

#[async_trait]
impl MessageStorage for ObservedMessages {
    async fn insert_message(&self, user: &UserId, message: Message) -> AnyResult<Message> {
        let message = self.inner.insert_message(user, message).await?;
        let conversation = self
            .conversation_delta(user, &message.conversation_id, true)
            .await;
        self.emit(user, Delta::create(message.clone()), conversation)
            .await;
        Ok(message)
    }

    async fn update_message(&self, user: &UserId, update: MessageUpdate) -> AnyResult<Message> {
        let message = self.inner.update_message(user, update).await?;
        let conversation = self
            .conversation_delta(user, &message.conversation_id, false)
            .await;
        self.emit(user, Delta::update(message.clone()), conversation)
            .await;
        Ok(message)
    }

    async fn delete_message(&self, user: &UserId, id: &str) -> AnyResult<()> {
        // the conversation can only be known before the deletion
        let conversation_id = match self.inner.get_message(user, id).await {
            Ok(message) => Some(message.conversation_id),
            Err(_) => None,
        };

        self.inner.delete_message(user, id).await?;

        let conversation = match conversation_id {
            Some(conversation_id) => self.conversation_delta(user, &conversation_id, false).await,
            None => None,
        };
        self.emit(user, Delta::delete(id), conversation).await;
        Ok(())
    }

    async fn get_message(&self, user: &UserId, id: &str) -> AnyResult<Message> {
        self.inner.get_message(user, id).await
    }

    async fn list_messages(&self, user: &UserId) -> AnyResult<Vec<Message>> {
        self.inner.list_messages(user).await
    }

    async fn count_messages(&self, user: &UserId) -> AnyResult<Vec<MessageCount>> {
        self.inner.count_messages(user).await
    }
}

/// Macro for defining an observed storage of an entity kind without
/// any aggregate.
macro_rules! observed_storage {
    ($entity:ident, $plural:ident) => {
        paste! {
            #[doc = "The observed " $entity:lower " storage."]
            pub struct [<Observed $plural:camel>] {
                inner: Arc<dyn [<$entity Storage>]>,
                emitter: Emitter,
            }

            impl [<Observed $plural:camel>] {
                pub fn new(inner: Arc<dyn [<$entity Storage>]>, emitter: Emitter) -> Self {
                    Self { inner, emitter }
                }

                async fn emit(&self, user: &UserId, delta: Delta<$entity>) {
                    let event = Event {
                        $plural: vec![delta],
                        ..Default::default()
                    };
                    self.emitter.emit(user, event).await;
                }
            }

            #[async_trait]
            impl [<$entity Storage>] for [<Observed $plural:camel>] {
                async fn [<insert_ $entity:snake>](
                    &self,
                    user: &UserId,
                    entity: $entity,
                ) -> AnyResult<$entity> {
                    let entity = self.inner.[<insert_ $entity:snake>](user, entity).await?;
                    self.emit(user, Delta::create(entity.clone())).await;
                    Ok(entity)
                }

                async fn [<update_ $entity:snake>](
                    &self,
                    user: &UserId,
                    update: [<$entity Update>],
                ) -> AnyResult<$entity> {
                    let entity = self.inner.[<update_ $entity:snake>](user, update).await?;
                    self.emit(user, Delta::update(entity.clone())).await;
                    Ok(entity)
                }

                async fn [<delete_ $entity:snake>](&self, user: &UserId, id: &str) -> AnyResult<()> {
                    self.inner.[<delete_ $entity:snake>](user, id).await?;
                    self.emit(user, Delta::delete(id)).await;
                    Ok(())
                }

                async fn [<get_ $entity:snake>](&self, user: &UserId, id: &str) -> AnyResult<$entity> {
                    self.inner.[<get_ $entity:snake>](user, id).await
                }

                async fn [<list_ $plural>](&self, user: &UserId) -> AnyResult<Vec<$entity>> {
                    self.inner.[<list_ $plural>](user).await
                }
            }
        }
    };
}

observed_storage!(Contact, contacts);
observed_storage!(Label, labels);
observed_storage!(Address, addresses);

impl Storage {
    /// Wrap every mutating capability so that successful mutations
    /// append events to the given store.
    ///
    /// Conversations are read-only aggregates, they are kept as is.
    pub fn observed(self, events: Arc<EventStore>) -> Self {
        let emitter = Emitter::new(events);

        Self {
            messages: Arc::new(ObservedMessages::new(
                self.messages,
                self.conversations.clone(),
                emitter.clone(),
            )),
            conversations: self.conversations,
            contacts: Arc::new(ObservedContacts::new(self.contacts, emitter.clone())),
            labels: Arc::new(ObservedLabels::new(self.labels, emitter.clone())),
            addresses: Arc::new(ObservedAddresses::new(self.addresses, emitter)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        config::SyncConfig,
        entity::{Contact, ContactUpdate, Message, MessageUpdate},
        event::{Action, EventStore},
        storage::Storage,
        user::UserId,
    };

    fn setup() -> (Arc<EventStore>, Storage) {
        let events = Arc::new(EventStore::new(SyncConfig::default()));
        let storage = Storage::memory().observed(events.clone());
        (events, storage)
    }

    fn message(id: &str, conversation_id: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation_id.into(),
            subject: id.into(),
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test)]
    async fn message_lifecycle() {
        let (events, storage) = setup();
        let user = UserId::from("user");
        let start = events.get_last_event(&user).await;

        storage
            .messages
            .insert_message(&user, message("1", "conv"))
            .await
            .unwrap();

        let event = events.get_last_event(&user).await;
        assert_eq!(event.messages[0].action(), Action::Create);
        assert_eq!(event.conversations[0].action(), Action::Create);

        storage
            .messages
            .insert_message(&user, message("2", "conv"))
            .await
            .unwrap();

        let event = events.get_last_event(&user).await;
        assert_eq!(event.conversations[0].action(), Action::Update);
        let conversation = event.conversations[0].entity().unwrap();
        assert_eq!(conversation.num_messages, 2);

        storage
            .messages
            .update_message(&user, MessageUpdate::new("2").with_unread(true))
            .await
            .unwrap();

        let event = events.get_last_event(&user).await;
        assert_eq!(event.messages[0].action(), Action::Update);
        assert!(event.messages[0].entity().unwrap().unread);
        assert_eq!(event.conversations[0].entity().unwrap().num_unread, 1);

        storage.messages.delete_message(&user, "1").await.unwrap();

        let event = events.get_last_event(&user).await;
        assert_eq!(event.messages[0].action(), Action::Delete);
        assert!(event.messages[0].entity().is_none());
        assert_eq!(event.conversations[0].action(), Action::Update);

        storage.messages.delete_message(&user, "2").await.unwrap();

        let event = events.get_last_event(&user).await;
        assert_eq!(event.conversations[0].action(), Action::Delete);
        assert_eq!(event.conversations[0].id(), "conv");

        let merged = events.get_events_after(&user, &start.id).await.unwrap();
        assert_eq!(merged.messages.len(), 5);
        assert_eq!(merged.conversations.len(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn failed_mutation_emits_nothing() {
        let (events, storage) = setup();
        let user = UserId::from("user");
        let last = events.get_last_event(&user).await;

        let err = storage.messages.delete_message(&user, "unknown").await;
        assert!(err.is_err());

        let err = storage
            .contacts
            .update_contact(
                &user,
                ContactUpdate {
                    id: "unknown".into(),
                    ..Default::default()
                },
            )
            .await;
        assert!(err.is_err());

        assert_eq!(events.get_last_event(&user).await.id, last.id);
    }

    #[test_log::test(tokio::test)]
    async fn contact_lifecycle() {
        let (events, storage) = setup();
        let user = UserId::from("user");
        let start = events.get_last_event(&user).await;

        let contact = storage
            .contacts
            .insert_contact(
                &user,
                Contact {
                    name: "Alice".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        storage
            .contacts
            .update_contact(
                &user,
                ContactUpdate {
                    id: contact.id.clone(),
                    name: Some("Alice Doe".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        storage
            .contacts
            .delete_contact(&user, &contact.id)
            .await
            .unwrap();

        let event = events.get_events_after(&user, &start.id).await.unwrap();
        let actions: Vec<_> = event.contacts.iter().map(|delta| delta.action()).collect();
        assert_eq!(actions, vec![Action::Create, Action::Update, Action::Delete]);
        assert_eq!(
            event.contacts[1].entity().map(|contact| contact.name.as_str()),
            Some("Alice Doe")
        );
        assert!(event.messages.is_empty());
    }
}
