use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Characters the backing store refuses inside a key segment.
const DISALLOWED_KEY_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// Rewrites an external identity so it can be used as a single storage key segment.
///
/// Disallowed characters and ASCII control characters become `_`. Two distinct inputs
/// can map to the same key (`a.b` and `a_b`); callers get no collision detection.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if DISALLOWED_KEY_CHARS.contains(&c) || c.is_ascii_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// The UID/name pair supplied by the game's local settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct ExternalIdentity {
    pub uid: String,
    pub name: String,
}

/// The player an operation acts on behalf of. Derived per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub original_id: String,
    pub sanitized_id: String,
    pub display_name: String,
}

impl PlayerIdentity {
    /// Validates the external UID/name and derives the sanitized key.
    pub fn new(uid: &str, name: &str) -> SyncResult<Self> {
        let uid = uid.trim();
        let name = name.trim();
        if uid.is_empty() {
            return Err(SyncError::MissingIdentity("no player UID".to_string()));
        }
        if name.is_empty() {
            return Err(SyncError::MissingIdentity("no display name".to_string()));
        }
        Ok(Self {
            original_id: uid.to_string(),
            sanitized_id: sanitize_key(uid),
            display_name: name.to_string(),
        })
    }

    /// Resolves the identity from an optional external source value.
    pub fn from_external(external: Option<ExternalIdentity>) -> SyncResult<Self> {
        match external {
            Some(ext) => Self::new(&ext.uid, &ext.name),
            None => Err(SyncError::MissingIdentity(
                "no player settings found".to_string(),
            )),
        }
    }
}
