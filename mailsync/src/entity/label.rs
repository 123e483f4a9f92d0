use super::Entity;

pub const INBOX: &str = "Inbox";
pub const DRAFTS: &str = "Drafts";
pub const SENT: &str = "Sent";
pub const TRASH: &str = "Trash";
pub const SPAM: &str = "Spam";
pub const ARCHIVE: &str = "Archive";
pub const STARRED: &str = "Starred";
pub const ALL_MAIL: &str = "AllMail";

/// The identifiers of the labels every mailbox has.
pub const SYSTEM_LABELS: [&str; 8] = [INBOX, DRAFTS, SENT, TRASH, SPAM, ARCHIVE, STARRED, ALL_MAIL];

/// The label kind enumeration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum LabelKind {
    /// A user label, a message can have many of them.
    #[default]
    Label,

    /// A user folder, a message can be in one folder at a time.
    Folder,

    /// A label managed by the mail store itself.
    System,
}

/// The label snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: String,
    pub kind: LabelKind,
    pub order: u32,
    pub exclusive: bool,
}

impl Label {
    pub fn apply(&mut self, update: LabelUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(color) = update.color {
            self.color = color;
        }
        if let Some(order) = update.order {
            self.order = order;
        }
    }
}

impl Entity for Label {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The sparse label update.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct LabelUpdate {
    pub id: String,
    pub name: Option<String>,
    pub color: Option<String>,
    pub order: Option<u32>,
}
