//! Error taxonomy shared by every sync component.
//!
//! Callers match on [`SyncError`] variants instead of inspecting strings.
//! Best-effort side channels never surface through this type; they log and move on.

use thiserror::Error;

/// Maximum number of characters of a remote response body kept in an error.
pub const MAX_ERROR_BODY_CHARS: usize = 256;

/// Result alias used across the crate.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Internet access is switched off for this process.
    #[error("Cloud sync is unavailable while internet access is disabled")]
    ConnectivityDisabled,

    /// The backing store rejected the bearer token (401/403).
    #[error("Authentication failed ({status}): {message}")]
    AuthenticationFailure { status: u16, message: String },

    /// Another anonymous account already owns this identity.
    #[error(
        "Identity '{sanitized_id}' is already bound to another account; \
         sign in with the account that first uploaded it"
    )]
    OwnershipConflict { sanitized_id: String },

    /// The external identity lacks a UID or display name.
    #[error("Player identity unavailable ({0}); start the game once to generate an identity")]
    MissingIdentity(String),

    /// Non-2xx backing-store response other than not-found.
    #[error("Backing store request failed ({status}): {body}")]
    BackingStoreFailure { status: u16, body: String },

    /// The identity service refused a sign-in, refresh or delete call.
    #[error("Identity service request failed ({status}): {message}")]
    IdentityService { status: u16, message: String },

    /// Connection-level failure before a response was received.
    #[error("Network error: {0}")]
    Transport(String),

    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unknown slot '{0}'; expected one of slot1..slot5")]
    InvalidSlot(String),

    #[error("Invalid modlist content: {0}")]
    InvalidContent(String),

    /// The local auth-state file could not be written or removed.
    #[error("Failed to persist auth state: {0}")]
    Persistence(String),

    /// A remote service answered with a payload we could not interpret.
    #[error("Unexpected payload: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Builds a [`SyncError::BackingStoreFailure`], truncating the body.
    pub fn backing_store(status: u16, body: &str) -> Self {
        SyncError::BackingStoreFailure {
            status,
            body: truncate_body(body),
        }
    }

    /// Builds a [`SyncError::IdentityService`], truncating the message.
    pub fn identity_service(status: u16, body: &str) -> Self {
        SyncError::IdentityService {
            status,
            message: truncate_body(body),
        }
    }

    /// Builds a [`SyncError::AuthenticationFailure`], truncating the message.
    pub fn auth_failure(status: u16, body: &str) -> Self {
        SyncError::AuthenticationFailure {
            status,
            message: truncate_body(body),
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::AuthenticationFailure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Serialization(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Cuts a response body down to [`MAX_ERROR_BODY_CHARS`] characters.
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_keeps_short_bodies() {
        assert_eq!(truncate_body("  {\"error\":\"x\"} "), "{\"error\":\"x\"}");
    }

    #[test]
    fn test_truncate_body_cuts_long_bodies_on_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), MAX_ERROR_BODY_CHARS + 3);
    }

    #[test]
    fn test_user_visible_messages_are_actionable() {
        let conflict = SyncError::OwnershipConflict {
            sanitized_id: "steam_123".to_string(),
        };
        assert!(conflict.to_string().contains("already bound to another account"));

        let missing = SyncError::MissingIdentity("no uid".to_string());
        assert!(missing
            .to_string()
            .contains("start the game once to generate an identity"));
    }

    #[test]
    fn test_kind_predicates() {
        assert!(SyncError::auth_failure(401, "denied").is_auth_failure());
        assert!(!SyncError::backing_store(500, "boom").is_auth_failure());
        assert!(SyncError::Cancelled.is_cancelled());
    }
}
