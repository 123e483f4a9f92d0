//! # Backend
//!
//! Module dedicated to the backend facade. The [`Backend`] glues the
//! event store, the observed storage capabilities and the optional
//! IMAP push bridge together, and exposes the event API to clients.
//!
//! Events handed to clients always carry message and conversation
//! counts computed fresh from the storage: counts are never merged
//! across events.

mod error;

use std::sync::Arc;

use tracing::debug;

#[doc(inline)]
pub use self::error::{Error, Result};
#[cfg(feature = "imap")]
use crate::imap::client::NativeImapConnector;
use crate::{
    config::SyncConfig,
    event::{Event, EventId, EventStore},
    imap::{Credentials, ImapBridge, ImapConfig, ImapConnector, ImapConversations, ImapMessageStorage},
    observer::Emitter,
    storage::{
        AddressStorage, ContactStorage, ConversationStorage, LabelStorage, MessageStorage, Storage,
    },
    user::UserId,
};

/// The backend builder.
pub struct BackendBuilder {
    config: SyncConfig,
    storage: Storage,
    imap: Option<(ImapConfig, Arc<dyn ImapConnector>)>,
}

impl BackendBuilder {
    /// Create a new builder, backed by an in-memory storage.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            storage: Storage::memory(),
            imap: None,
        }
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// Back messages and conversations by the IMAP mailbox reached
    /// with the given connector.
    pub fn with_imap(mut self, config: ImapConfig, connector: Arc<dyn ImapConnector>) -> Self {
        self.imap = Some((config, connector));
        self
    }

    /// Same as [`BackendBuilder::with_imap`], using the real IMAP
    /// connector.
    #[cfg(feature = "imap")]
    pub fn with_imap_server(self, config: ImapConfig) -> Self {
        let connector = Arc::new(NativeImapConnector::new(config.clone()));
        self.with_imap(config, connector)
    }

    pub fn build(self) -> Backend {
        let events = Arc::new(EventStore::new(self.config));
        let mut storage = self.storage;

        let imap = self.imap.map(|(config, connector)| {
            let emitter = Emitter::new(events.clone());
            let bridge = Arc::new(ImapBridge::new(config, connector, emitter));

            storage = storage
                .clone()
                .with_messages(Arc::new(ImapMessageStorage::new(bridge.clone())))
                .with_conversations(Arc::new(ImapConversations::new(bridge.clone())));

            bridge
        });

        Backend {
            storage: storage.observed(events.clone()),
            events,
            imap,
        }
    }
}

/// The backend facade.
pub struct Backend {
    events: Arc<EventStore>,
    storage: Storage,
    imap: Option<Arc<ImapBridge>>,
}

impl Backend {
    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// Return the observed storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn messages(&self) -> &Arc<dyn MessageStorage> {
        &self.storage.messages
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStorage> {
        &self.storage.conversations
    }

    pub fn contacts(&self) -> &Arc<dyn ContactStorage> {
        &self.storage.contacts
    }

    pub fn labels(&self) -> &Arc<dyn LabelStorage> {
        &self.storage.labels
    }

    pub fn addresses(&self) -> &Arc<dyn AddressStorage> {
        &self.storage.addresses
    }

    pub fn imap(&self) -> Option<&Arc<ImapBridge>> {
        self.imap.as_ref()
    }

    /// Open the IMAP session of the given user.
    pub async fn login(&self, user: &UserId, credentials: Credentials) -> crate::Result<()> {
        let imap = self
            .imap
            .as_ref()
            .ok_or_else(|| Error::ImapNotConfiguredError(user.clone()))?;
        imap.login(user, credentials).await?;
        Ok(())
    }

    /// Close the IMAP session of the given user, if any.
    pub async fn logout(&self, user: &UserId) -> bool {
        match &self.imap {
            Some(imap) => imap.logout(user).await,
            None => false,
        }
    }

    pub async fn insert_event(&self, user: &UserId, event: Event) -> EventId {
        self.events.insert_event(user, event).await
    }

    pub async fn get_last_event(&self, user: &UserId) -> crate::Result<Event> {
        let event = self.events.get_last_event(user).await;
        self.with_counts(user, event).await
    }

    /// See [`EventStore::get_events_after`].
    pub async fn get_events_after(&self, user: &UserId, id: &EventId) -> crate::Result<Event> {
        let event = self.events.get_events_after(user, id).await?;
        self.with_counts(user, event).await
    }

    /// Delete every event of the given user, and tear down its IMAP
    /// session.
    pub async fn delete_all_events(&self, user: &UserId) -> crate::Result<()> {
        self.logout(user).await;
        self.events.delete_all_events(user).await;
        Ok(())
    }

    /// Run the garbage collector over every log.
    pub async fn collect_garbage(&self) -> usize {
        self.events.collect_garbage().await
    }

    async fn with_counts(&self, user: &UserId, mut event: Event) -> crate::Result<Event> {
        event.message_counts = self
            .storage
            .messages
            .count_messages(user)
            .await
            .map_err(|err| Error::CountMessagesError(err, user.clone()))?;

        event.conversation_counts = self
            .storage
            .conversations
            .count_conversations(user)
            .await
            .map_err(|err| Error::CountConversationsError(err, user.clone()))?;

        debug!(%user, id = %event.id, "event counts computed");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::SyncConfig,
        entity::{label, Message},
        imap::Credentials,
        user::UserId,
        Error,
    };

    use super::{BackendBuilder, Error as BackendError};

    fn message(id: &str, unread: bool) -> Message {
        Message {
            id: id.into(),
            label_ids: vec![label::INBOX.into()],
            unread,
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test)]
    async fn fresh_counts() {
        let backend = BackendBuilder::new(SyncConfig::default()).build();
        let user = UserId::from("user");
        let start = backend.get_last_event(&user).await.unwrap();

        let messages = backend.messages();
        messages.insert_message(&user, message("1", true)).await.unwrap();
        messages.insert_message(&user, message("2", false)).await.unwrap();

        let event = backend.get_events_after(&user, &start.id).await.unwrap();
        assert_eq!(event.messages.len(), 2);

        let inbox = event
            .message_counts
            .iter()
            .find(|count| count.label_id == label::INBOX)
            .unwrap();
        assert_eq!(inbox.total, 2);
        assert_eq!(inbox.unread, 1);

        let inbox = event
            .conversation_counts
            .iter()
            .find(|count| count.label_id == label::INBOX)
            .unwrap();
        assert_eq!(inbox.total, 2);
    }

    #[test_log::test(tokio::test)]
    async fn delete_all_events() {
        let backend = BackendBuilder::new(SyncConfig::default()).build();
        let user = UserId::from("user");
        let first = backend.get_last_event(&user).await.unwrap();

        backend.delete_all_events(&user).await.unwrap();

        let err = backend.get_events_after(&user, &first.id).await.unwrap_err();
        assert!(matches!(err, Error::EventError(err) if err.is_not_found()));
    }

    #[test_log::test(tokio::test)]
    async fn login_without_imap() {
        let backend = BackendBuilder::new(SyncConfig::default()).build();
        let user = UserId::from("user");

        let err = backend
            .login(&user, Credentials::new("user", "password"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::BackendError(BackendError::ImapNotConfiguredError(_))
        ));
        assert!(!backend.logout(&user).await);
    }
}
