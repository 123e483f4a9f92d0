//! # Conversation
//!
//! A conversation is never stored as such: it is an aggregate
//! derived from every message sharing the same conversation
//! identifier. See [`Conversation::from_messages`].

use std::collections::BTreeMap;

use super::{EmailAddress, Entity, Message};

/// The conversation aggregate.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Conversation {
    pub id: String,
    /// The subject of the oldest message.
    pub subject: String,
    pub senders: Vec<EmailAddress>,
    pub recipients: Vec<EmailAddress>,
    pub num_messages: u32,
    pub num_unread: u32,
    pub num_attachments: u32,
    /// Unix timestamp of the newest message.
    pub time: i64,
    pub size: u64,
    pub labels: Vec<ConversationLabel>,
}

/// Per-label statistics of a conversation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ConversationLabel {
    pub id: String,
    pub num_messages: u32,
    pub num_unread: u32,
}

impl Conversation {
    /// Derive the conversation aggregate from all its messages.
    ///
    /// Messages that do not belong to the given conversation are
    /// skipped. Returns `None` when no message is left, which means
    /// the conversation does not exist (anymore).
    pub fn from_messages<'a>(
        id: &str,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> Option<Self> {
        let mut messages: Vec<&Message> = messages
            .into_iter()
            .filter(|message| message.conversation_id == id)
            .collect();

        if messages.is_empty() {
            return None;
        }

        messages.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));

        let mut conversation = Conversation {
            id: id.to_owned(),
            subject: messages[0].subject.clone(),
            ..Default::default()
        };

        let mut labels = BTreeMap::<&str, ConversationLabel>::new();

        for message in messages {
            if !conversation.senders.contains(&message.sender) {
                conversation.senders.push(message.sender.clone());
            }

            for recipient in message.recipients() {
                if !conversation.recipients.contains(recipient) {
                    conversation.recipients.push(recipient.clone());
                }
            }

            conversation.num_messages += 1;
            conversation.num_attachments += message.num_attachments;
            conversation.size += message.size;
            conversation.time = conversation.time.max(message.time);

            if message.unread {
                conversation.num_unread += 1;
            }

            for label_id in &message.label_ids {
                let label = labels
                    .entry(label_id.as_str())
                    .or_insert_with(|| ConversationLabel {
                        id: label_id.clone(),
                        ..Default::default()
                    });
                label.num_messages += 1;
                if message.unread {
                    label.num_unread += 1;
                }
            }
        }

        conversation.labels = labels.into_values().collect();

        Some(conversation)
    }

    /// Return `true` if at least one message of the conversation has
    /// the given label.
    pub fn has_label(&self, label_id: &str) -> bool {
        self.labels.iter().any(|label| label.id == label_id)
    }
}

impl Entity for Conversation {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{label, EmailAddress, Message};

    use super::{Conversation, ConversationLabel};

    fn message(id: &str, time: i64, unread: bool) -> Message {
        Message {
            id: id.into(),
            conversation_id: "conv".into(),
            label_ids: vec![label::INBOX.into()],
            subject: format!("subject {id}"),
            sender: EmailAddress::from(format!("{id}@localhost").as_str()),
            to_list: vec![EmailAddress::from("alice@localhost")],
            time,
            size: 10,
            unread,
            ..Default::default()
        }
    }

    #[test]
    fn derive_from_siblings() {
        let mut other = message("3", 0, true);
        other.conversation_id = "other".into();

        let messages = [message("2", 20, false), message("1", 10, true), other];
        let conversation = Conversation::from_messages("conv", &messages).unwrap();

        assert_eq!(conversation.subject, "subject 1");
        assert_eq!(conversation.num_messages, 2);
        assert_eq!(conversation.num_unread, 1);
        assert_eq!(conversation.time, 20);
        assert_eq!(conversation.size, 20);
        assert_eq!(conversation.senders.len(), 2);
        assert_eq!(conversation.recipients.len(), 1);
        assert_eq!(
            conversation.labels,
            vec![ConversationLabel {
                id: label::INBOX.into(),
                num_messages: 2,
                num_unread: 1,
            }]
        );
    }

    #[test]
    fn derive_from_nothing() {
        let messages: Vec<Message> = Vec::new();
        assert_eq!(Conversation::from_messages("conv", &messages), None);
    }
}
