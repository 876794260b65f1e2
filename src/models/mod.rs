pub mod auth_state;
pub mod identity;
pub mod slot;

// Re-export the model types so callers can do "use crate::models::*;"
pub use auth_state::{AuthState, Session, EXPIRY_SKEW_SECS};
pub use identity::{sanitize_key, ExternalIdentity, PlayerIdentity};
pub use slot::{RegistryEntry, Slot, SlotNode, UPLOADER_ACCOUNT_FIELD, UPLOADER_ID_FIELD, UPLOADER_NAME_FIELD};
