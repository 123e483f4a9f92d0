use super::{label, EmailAddress, Entity};

/// The message snapshot.
///
/// The body is kept opaque: parsing MIME parts is left to the
/// client.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Message {
    pub id: String,
    /// The identifier shared by all messages of the same thread.
    pub conversation_id: String,
    pub address_id: String,
    pub label_ids: Vec<String>,
    pub subject: String,
    pub sender: EmailAddress,
    pub to_list: Vec<EmailAddress>,
    pub cc_list: Vec<EmailAddress>,
    pub bcc_list: Vec<EmailAddress>,
    /// Unix timestamp of the message.
    pub time: i64,
    pub size: u64,
    pub unread: bool,
    pub num_attachments: u32,
    pub header: String,
    pub body: String,
}

impl Message {
    /// Return `true` if the message has the given label.
    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|id| id == label_id)
    }

    /// Return `true` if the message has the Starred label.
    pub fn is_starred(&self) -> bool {
        self.has_label(label::STARRED)
    }

    /// Iterate over every recipient of the message.
    pub fn recipients(&self) -> impl Iterator<Item = &EmailAddress> {
        self.to_list
            .iter()
            .chain(self.cc_list.iter())
            .chain(self.bcc_list.iter())
    }

    /// Apply the given sparse update.
    pub fn apply(&mut self, update: MessageUpdate) {
        if let Some(label_ids) = update.label_ids {
            self.label_ids = label_ids;
        }
        if let Some(subject) = update.subject {
            self.subject = subject;
        }
        if let Some(unread) = update.unread {
            self.unread = unread;
        }
        if let Some(header) = update.header {
            self.header = header;
        }
        if let Some(body) = update.body {
            self.body = body;
        }
    }
}

impl Entity for Message {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The sparse message update.
///
/// Conversation, sender and recipients cannot be changed once the
/// message exists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct MessageUpdate {
    pub id: String,
    pub label_ids: Option<Vec<String>>,
    pub subject: Option<String>,
    pub unread: Option<bool>,
    pub header: Option<String>,
    pub body: Option<String>,
}

impl MessageUpdate {
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_label_ids(mut self, label_ids: impl IntoIterator<Item = impl ToString>) -> Self {
        self.label_ids = Some(label_ids.into_iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn with_subject(mut self, subject: impl ToString) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn with_unread(mut self, unread: bool) -> Self {
        self.unread = Some(unread);
        self
    }

    pub fn with_body(mut self, body: impl ToString) -> Self {
        self.body = Some(body.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageUpdate};

    #[test]
    fn apply_sparse_update() {
        let mut message = Message {
            id: "1".into(),
            subject: "Hello".into(),
            unread: true,
            body: "body".into(),
            ..Default::default()
        };

        message.apply(MessageUpdate::new("1").with_unread(false));

        assert_eq!(message.subject, "Hello");
        assert_eq!(message.body, "body");
        assert!(!message.unread);
    }
}
