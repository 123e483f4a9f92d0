use std::collections::BTreeMap;

use super::{Conversation, Message};

/// Per-label aggregate of messages or conversations.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct MessageCount {
    pub label_id: String,
    pub total: u32,
    pub unread: u32,
}

impl MessageCount {
    /// Count messages per label, sorted by label identifier.
    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<Self> {
        let mut counts = BTreeMap::<&str, MessageCount>::new();

        for message in messages {
            for label_id in &message.label_ids {
                let count = counts.entry(label_id.as_str()).or_insert_with(|| MessageCount {
                    label_id: label_id.clone(),
                    ..Default::default()
                });
                count.total += 1;
                if message.unread {
                    count.unread += 1;
                }
            }
        }

        counts.into_values().collect()
    }

    /// Count conversations per label, sorted by label identifier.
    ///
    /// A conversation counts as unread in a label as soon as one of
    /// its messages having this label is unread.
    pub fn from_conversations<'a>(
        conversations: impl IntoIterator<Item = &'a Conversation>,
    ) -> Vec<Self> {
        let mut counts = BTreeMap::<&str, MessageCount>::new();

        for conversation in conversations {
            for label in &conversation.labels {
                let count = counts.entry(label.id.as_str()).or_insert_with(|| MessageCount {
                    label_id: label.id.clone(),
                    ..Default::default()
                });
                count.total += 1;
                if label.num_unread > 0 {
                    count.unread += 1;
                }
            }
        }

        counts.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{label, Conversation, Message};

    use super::MessageCount;

    #[test]
    fn count_messages_and_conversations() {
        let messages = [
            Message {
                id: "1".into(),
                conversation_id: "a".into(),
                label_ids: vec![label::INBOX.into(), label::STARRED.into()],
                unread: true,
                ..Default::default()
            },
            Message {
                id: "2".into(),
                conversation_id: "a".into(),
                label_ids: vec![label::INBOX.into()],
                ..Default::default()
            },
            Message {
                id: "3".into(),
                conversation_id: "b".into(),
                label_ids: vec![label::INBOX.into()],
                ..Default::default()
            },
        ];

        let counts = MessageCount::from_messages(&messages);
        assert_eq!(
            counts,
            vec![
                MessageCount {
                    label_id: label::INBOX.into(),
                    total: 3,
                    unread: 1,
                },
                MessageCount {
                    label_id: label::STARRED.into(),
                    total: 1,
                    unread: 1,
                },
            ]
        );

        let conversations = [
            Conversation::from_messages("a", &messages).unwrap(),
            Conversation::from_messages("b", &messages).unwrap(),
        ];

        let counts = MessageCount::from_conversations(&conversations);
        assert_eq!(
            counts,
            vec![
                MessageCount {
                    label_id: label::INBOX.into(),
                    total: 2,
                    unread: 1,
                },
                MessageCount {
                    label_id: label::STARRED.into(),
                    total: 1,
                    unread: 1,
                },
            ]
        );
    }
}
