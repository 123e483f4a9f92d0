use super::Entity;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum AddressStatus {
    #[default]
    Enabled,
    Disabled,
}

/// The address snapshot, one of the sending identities of a user.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Address {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub signature: String,
    pub status: AddressStatus,
    pub order: u32,
}

impl Address {
    pub fn apply(&mut self, update: AddressUpdate) {
        if let Some(display_name) = update.display_name {
            self.display_name = display_name;
        }
        if let Some(signature) = update.signature {
            self.signature = signature;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(order) = update.order {
            self.order = order;
        }
    }
}

impl Entity for Address {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The sparse address update.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct AddressUpdate {
    pub id: String,
    pub display_name: Option<String>,
    pub signature: Option<String>,
    pub status: Option<AddressStatus>,
    pub order: Option<u32>,
}
