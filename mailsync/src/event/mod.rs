//! # Event module
//!
//! Module dedicated to change tracking. The main entities are
//! [`Event`], [`Delta`] and [`EventId`].
//!
//! An [`Event`] is one unit of change information handed to a
//! client. It can either represent a single mutation, or the merge of
//! every mutation a client missed since its last poll (see
//! [`Event::merge`]).
//!
//! The [`log`] module contains the per-user ordered log, the
//! [`listener`] module the coordinator waking clients blocked on the
//! newest entry, and the [`store`] module the public API gluing both.

mod error;
pub mod listener;
pub mod log;
pub mod store;

use std::{fmt, ops::BitOr, ops::BitOrAssign};

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    store::EventStore,
};
use crate::entity::{Address, Contact, Conversation, Entity, Label, Message, MessageCount};

/// The opaque identifier of an event.
///
/// Identifiers are only meaningful within the log of one user.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct EventId(String);

impl EventId {
    /// Generate a new, random event identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The subsystems a client needs to reload from scratch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Refresh(u8);

impl Refresh {
    pub const NONE: Self = Self(0);
    pub const MAIL: Self = Self(1);
    pub const CONTACTS: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Refresh {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Refresh {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// The action a delta describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// The change of one entity.
///
/// Create and update deltas always carry the full snapshot of the
/// entity, never a diff. Delete deltas never carry any snapshot. The
/// constructors [`Delta::create`], [`Delta::update`] and
/// [`Delta::delete`] enforce it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Delta<T> {
    id: String,
    action: Action,
    entity: Option<T>,
}

impl<T: Entity> Delta<T> {
    pub fn create(entity: T) -> Self {
        Self {
            id: entity.id().to_owned(),
            action: Action::Create,
            entity: Some(entity),
        }
    }

    pub fn update(entity: T) -> Self {
        Self {
            id: entity.id().to_owned(),
            action: Action::Update,
            entity: Some(entity),
        }
    }

    pub fn delete(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            action: Action::Delete,
            entity: None,
        }
    }
}

impl<T> Delta<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn entity(&self) -> Option<&T> {
        self.entity.as_ref()
    }

    pub fn into_entity(self) -> Option<T> {
        self.entity
    }
}

/// The event structure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Event {
    pub id: EventId,
    pub refresh: Refresh,
    pub reload: bool,
    pub notices: Vec<String>,
    pub messages: Vec<Delta<Message>>,
    pub conversations: Vec<Delta<Conversation>>,
    pub labels: Vec<Delta<Label>>,
    pub contacts: Vec<Delta<Contact>>,
    pub addresses: Vec<Delta<Address>>,
    pub message_counts: Vec<MessageCount>,
    pub conversation_counts: Vec<MessageCount>,
}

impl Event {
    /// Create an event without any change, tagged with the given
    /// identifier.
    pub fn empty(id: EventId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Return `true` if the event does not carry any change.
    ///
    /// Counts are not considered as changes.
    pub fn is_empty(&self) -> bool {
        self.refresh.is_empty()
            && !self.reload
            && self.notices.is_empty()
            && self.messages.is_empty()
            && self.conversations.is_empty()
            && self.labels.is_empty()
            && self.contacts.is_empty()
            && self.addresses.is_empty()
    }

    /// Fold the given event into this one.
    ///
    /// Reload flags are OR'd, notices and deltas are appended in
    /// order. Deltas targeting the same entity are kept as is: the
    /// last one wins on the client side. Counts are left untouched,
    /// they are recomputed when the event is handed to a client.
    pub fn merge(&mut self, next: &Event) {
        self.refresh |= next.refresh;
        self.reload |= next.reload;
        self.notices.extend_from_slice(&next.notices);
        self.messages.extend_from_slice(&next.messages);
        self.conversations.extend_from_slice(&next.conversations);
        self.labels.extend_from_slice(&next.labels);
        self.contacts.extend_from_slice(&next.contacts);
        self.addresses.extend_from_slice(&next.addresses);
    }

    /// Merge every given event, in order, into a single one tagged
    /// with the given identifier.
    pub fn merge_all<'a>(id: EventId, events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut merged = Event::empty(id);
        for event in events {
            merged.merge(event);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{Contact, Message};

    use super::{Action, Delta, Event, EventId, Refresh};

    fn message(id: &str) -> Message {
        Message {
            id: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn delta_snapshots() {
        let delta = Delta::create(message("1"));
        assert_eq!(delta.id(), "1");
        assert_eq!(delta.action(), Action::Create);
        assert_eq!(delta.entity(), Some(&message("1")));

        let delta = Delta::update(message("1"));
        assert_eq!(delta.action(), Action::Update);
        assert!(delta.entity().is_some());

        let delta = Delta::<Message>::delete("1");
        assert_eq!(delta.action(), Action::Delete);
        assert_eq!(delta.entity(), None);
    }

    #[test]
    fn merge_concatenates_in_order() {
        let first = Event {
            id: "1".into(),
            notices: vec!["first".into()],
            messages: vec![Delta::create(message("a"))],
            ..Default::default()
        };

        let second = Event {
            id: "2".into(),
            refresh: Refresh::CONTACTS,
            notices: vec!["second".into()],
            messages: vec![Delta::update(message("a")), Delta::create(message("b"))],
            contacts: vec![Delta::<Contact>::delete("c")],
            ..Default::default()
        };

        let third = Event {
            id: "3".into(),
            reload: true,
            refresh: Refresh::MAIL,
            messages: vec![Delta::delete("a")],
            ..Default::default()
        };

        let merged = Event::merge_all(EventId::from("3"), [&first, &second, &third]);

        assert_eq!(merged.id, EventId::from("3"));
        assert!(merged.reload);
        assert!(merged.refresh.contains(Refresh::MAIL));
        assert!(merged.refresh.contains(Refresh::CONTACTS));
        assert_eq!(merged.notices, vec!["first", "second"]);

        let actions: Vec<_> = merged
            .messages
            .iter()
            .map(|delta| (delta.id(), delta.action()))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("a", Action::Create),
                ("a", Action::Update),
                ("b", Action::Create),
                ("a", Action::Delete),
            ]
        );
        assert_eq!(merged.contacts.len(), 1);
    }

    #[test]
    fn empty_event() {
        let event = Event::empty(EventId::generate());
        assert!(event.is_empty());

        let event = Event {
            refresh: Refresh::MAIL,
            ..Default::default()
        };
        assert!(!event.is_empty());
    }
}
