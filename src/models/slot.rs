use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Content field overwritten with the uploader's display name on every save.
pub const UPLOADER_NAME_FIELD: &str = "uploaderName";
/// Content field overwritten with the uploader's sanitized identity on every save.
pub const UPLOADER_ID_FIELD: &str = "uploaderId";
/// Content field overwritten with the owning anonymous account on every save.
pub const UPLOADER_ACCOUNT_FIELD: &str = "uploaderAccountId";

/// One of the five fixed storage locations each identity has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Slot1,
    Slot2,
    Slot3,
    Slot4,
    Slot5,
}

impl Slot {
    pub const ALL: [Slot; 5] = [Slot::Slot1, Slot::Slot2, Slot::Slot3, Slot::Slot4, Slot::Slot5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Slot1 => "slot1",
            Slot::Slot2 => "slot2",
            Slot::Slot3 => "slot3",
            Slot::Slot4 => "slot4",
            Slot::Slot5 => "slot5",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| SyncError::InvalidSlot(s.to_string()))
    }
}

/// Private per-identity slot record stored at `/users/{sanitizedId}/{slot}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    /// Serialized modlist JSON.
    pub content: String,
    pub date_added: String,
}

/// Public mirror stored at `/registry/{registryId}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub content: String,
    pub date_added: String,
}
