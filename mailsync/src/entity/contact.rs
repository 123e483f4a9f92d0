use super::Entity;

/// The contact snapshot.
///
/// Cards are kept opaque (usually signed or encrypted vCards).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub emails: Vec<ContactEmail>,
    pub cards: Vec<String>,
}

/// One email address of a contact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ContactEmail {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl Contact {
    pub fn apply(&mut self, update: ContactUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(emails) = update.emails {
            self.emails = emails;
        }
        if let Some(cards) = update.cards {
            self.cards = cards;
        }
    }
}

impl Entity for Contact {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The sparse contact update.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ContactUpdate {
    pub id: String,
    pub name: Option<String>,
    pub emails: Option<Vec<ContactEmail>>,
    pub cards: Option<Vec<String>>,
}
