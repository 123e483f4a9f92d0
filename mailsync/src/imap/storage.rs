//! # IMAP storage
//!
//! Module dedicated to the message storage backed by the watched
//! IMAP mailbox of each user. Messages are identified by their UID,
//! and each message is its own conversation.
//!
//! Deleting a message only expunges that message, other messages
//! flagged as deleted are left untouched.
//!
//! Only the unread status (`\Seen`) and the Starred label
//! (`\Flagged`) of a stored message can be updated.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use mail_builder::{headers::address::Address, MessageBuilder};
use tracing::debug;

use super::{Error, ImapBridge, Result, DELETED, FLAGGED, SEEN};
use crate::{
    entity::{label, Conversation, EmailAddress, Message, MessageUpdate},
    storage::{ConversationStorage, MessageStorage},
    user::UserId,
    AnyResult,
};

fn parse_uid(id: &str) -> Result<u32> {
    id.parse()
        .map_err(|err| Error::ParseMessageIdError(err, id.to_owned()))
}

fn to_address(address: &EmailAddress) -> Address<'_> {
    Address::new_address(address.name.as_deref(), address.address.as_str())
}

fn to_address_list(addresses: &[EmailAddress]) -> Address<'_> {
    Address::new_list(addresses.iter().map(to_address).collect())
}

/// Build the raw RFC 822 message of the given snapshot.
fn build_raw_message(message: &Message) -> Result<Vec<u8>> {
    let mut builder = MessageBuilder::new()
        .from(to_address(&message.sender))
        .subject(message.subject.as_str())
        .text_body(message.body.as_str());

    if message.time > 0 {
        builder = builder.date(message.time);
    }
    if !message.to_list.is_empty() {
        builder = builder.to(to_address_list(&message.to_list));
    }
    if !message.cc_list.is_empty() {
        builder = builder.cc(to_address_list(&message.cc_list));
    }
    if !message.bcc_list.is_empty() {
        builder = builder.bcc(to_address_list(&message.bcc_list));
    }

    builder.write_to_vec().map_err(Error::BuildMessageError)
}

/// The IMAP message storage.
#[derive(Clone)]
pub struct ImapMessageStorage {
    bridge: Arc<ImapBridge>,
}

impl ImapMessageStorage {
    pub fn new(bridge: Arc<ImapBridge>) -> Self {
        Self { bridge }
    }

    async fn fetch_message(&self, user: &UserId, uid: u32) -> Result<Message> {
        let session = self.bridge.session(user).await?;

        let messages = session
            .exec(move |client| Box::pin(async move { client.fetch_messages(&uid.to_string()).await }))
            .await?;

        let message = messages
            .into_iter()
            .find(|message| message.uid == uid)
            .ok_or(Error::MessageNotFoundError(uid))?;

        Ok(message.into_message(session.mailbox()))
    }
}

#[async_trait]
impl MessageStorage for ImapMessageStorage {
    async fn insert_message(&self, user: &UserId, message: Message) -> AnyResult<Message> {
        let session = self.bridge.session(user).await?;
        let mailbox = session.mailbox().to_owned();
        let raw = build_raw_message(&message)?;

        let mut flags = Vec::new();
        if !message.unread {
            flags.push(SEEN);
        }
        if message.is_starred() {
            flags.push(FLAGGED);
        }

        // the append must not be replayed when the operation is
        // retried after a reconnection
        let appended = Arc::new(StdMutex::new(None));

        let (uid, message) = session
            .exec_append(move |client| {
                let mailbox = mailbox.clone();
                let raw = raw.clone();
                let flags = flags.clone();
                let appended = appended.clone();

                Box::pin(async move {
                    let prev = *appended.lock().unwrap_or_else(PoisonError::into_inner);
                    let uid = match prev {
                        Some(uid) => uid,
                        None => {
                            let uid = client.append(&mailbox, &raw, &flags).await?;
                            *appended.lock().unwrap_or_else(PoisonError::into_inner) = Some(uid);
                            uid
                        }
                    };

                    let message = client
                        .fetch_messages(&uid.to_string())
                        .await?
                        .into_iter()
                        .find(|message| message.uid == uid)
                        .ok_or(Error::MessageNotFoundError(uid))?;

                    Ok((uid, message))
                })
            })
            .await?;

        debug!(%user, uid, "message appended");
        Ok(message.into_message(session.mailbox()))
    }

    async fn update_message(&self, user: &UserId, update: MessageUpdate) -> AnyResult<Message> {
        if update.subject.is_some() || update.header.is_some() || update.body.is_some() {
            return Err(Error::UpdateMessageFieldsError(update.id).into());
        }

        let uid = parse_uid(&update.id)?;
        let unread = update.unread;
        let starred = update
            .label_ids
            .as_ref()
            .map(|ids| ids.iter().any(|id| id == label::STARRED));

        self.bridge
            .exec(user, move |client| {
                Box::pin(async move {
                    let uids = uid.to_string();
                    if let Some(unread) = unread {
                        client.store_flags(&uids, &[SEEN], !unread).await?;
                    }
                    if let Some(starred) = starred {
                        client.store_flags(&uids, &[FLAGGED], starred).await?;
                    }
                    Ok(())
                })
            })
            .await?;

        Ok(self.fetch_message(user, uid).await?)
    }

    async fn delete_message(&self, user: &UserId, id: &str) -> AnyResult<()> {
        let uid = parse_uid(id)?;

        self.bridge
            .exec(user, move |client| {
                Box::pin(async move {
                    let uids = uid.to_string();
                    client.store_flags(&uids, &[DELETED], true).await?;
                    client.uid_expunge(&uids).await
                })
            })
            .await?;

        debug!(%user, uid, "message deleted");
        Ok(())
    }

    async fn get_message(&self, user: &UserId, id: &str) -> AnyResult<Message> {
        let uid = parse_uid(id)?;
        Ok(self.fetch_message(user, uid).await?)
    }

    async fn list_messages(&self, user: &UserId) -> AnyResult<Vec<Message>> {
        let session = self.bridge.session(user).await?;

        let messages = session
            .exec(|client| Box::pin(async move { client.fetch_messages("1:*").await }))
            .await?
            .into_iter()
            .map(|message| message.into_message(session.mailbox()))
            .collect();

        Ok(messages)
    }
}

/// The IMAP conversation storage.
///
/// IMAP messages are not threaded: each conversation is made of a
/// single message, and shares its identifier.
#[derive(Clone)]
pub struct ImapConversations {
    messages: ImapMessageStorage,
}

impl ImapConversations {
    pub fn new(bridge: Arc<ImapBridge>) -> Self {
        Self {
            messages: ImapMessageStorage::new(bridge),
        }
    }
}

#[async_trait]
impl ConversationStorage for ImapConversations {
    async fn find_conversation(&self, user: &UserId, id: &str) -> AnyResult<Option<Conversation>> {
        let Ok(uid) = parse_uid(id) else {
            return Ok(None);
        };

        match self.messages.fetch_message(user, uid).await {
            Ok(message) => Ok(Conversation::from_messages(id, [&message])),
            Err(Error::MessageNotFoundError(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_conversations(&self, user: &UserId) -> AnyResult<Vec<Conversation>> {
        let messages = self.messages.list_messages(user).await?;

        let conversations = messages
            .iter()
            .filter_map(|message| Conversation::from_messages(&message.id, [message]))
            .collect();

        Ok(conversations)
    }
}
