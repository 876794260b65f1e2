use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Tokens are treated as expired this many seconds before their stated expiry.
pub const EXPIRY_SKEW_SECS: i64 = 120;

/// The anonymous-identity credentials held by the authenticator and mirrored to disk.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub id_token: String,
    pub refresh_token: String,
    pub expiration_utc: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub account_id: String,
}

impl AuthState {
    /// Builds a state from a freshly issued token with a lifetime in seconds.
    ///
    /// A lifetime that does not fit a timestamp is rejected as a malformed answer.
    pub fn issued(
        id_token: String,
        refresh_token: String,
        expires_in_secs: i64,
        account_id: String,
    ) -> SyncResult<Self> {
        let expiration_utc = Duration::try_seconds(expires_in_secs)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                SyncError::Serialization(format!("expiresIn out of range: {}", expires_in_secs))
            })?;
        Ok(Self {
            id_token,
            refresh_token,
            expiration_utc,
            account_id,
        })
    }

    /// Every field must be non-empty for the state to be usable.
    pub fn is_complete(&self) -> bool {
        !self.id_token.is_empty() && !self.refresh_token.is_empty() && !self.account_id.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_utc
            .checked_sub_signed(Duration::seconds(EXPIRY_SKEW_SECS))
            .map_or(true, |deadline| now >= deadline)
    }

    pub fn session(&self) -> Session {
        Session {
            id_token: self.id_token.clone(),
            account_id: self.account_id.clone(),
        }
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("expiration_utc", &self.expiration_utc)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// A bearer token plus the anonymous account it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub id_token: String,
    pub account_id: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_expiring_in(secs: i64) -> AuthState {
        AuthState::issued(
            "id".to_string(),
            "refresh".to_string(),
            secs,
            "acct".to_string(),
        )
        .unwrap()
    }

    /// A token 90 seconds from expiry falls inside the skew window.
    #[test]
    fn test_expiry_inside_skew_is_expired() {
        assert!(state_expiring_in(90).is_expired());
    }

    /// A token 121 seconds from expiry is still usable.
    #[test]
    fn test_expiry_outside_skew_is_valid() {
        let state = state_expiring_in(121);
        // Evaluate at the instant the state was built so the test is not timing sensitive.
        let built_at = state.expiration_utc - Duration::seconds(121);
        assert!(!state.is_expired_at(built_at));
    }

    #[test]
    fn test_expiry_exactly_at_skew_boundary_is_expired() {
        let state = state_expiring_in(600);
        let boundary = state.expiration_utc - Duration::seconds(EXPIRY_SKEW_SECS);
        assert!(state.is_expired_at(boundary));
        assert!(!state.is_expired_at(boundary - Duration::seconds(1)));
    }

    #[test]
    fn test_unrepresentable_lifetime_is_rejected() {
        for secs in [i64::MAX, i64::MIN, 400_000_000_000_000] {
            let result = AuthState::issued("id".into(), "refresh".into(), secs, "acct".into());
            assert!(
                matches!(result, Err(SyncError::Serialization(_))),
                "accepted lifetime {secs}"
            );
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let state = state_expiring_in(3600);
        let json = serde_json::to_value(&state).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["idToken", "refreshToken", "expirationUtc", "userId"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_debug_hides_tokens() {
        let rendered = format!("{:?}", state_expiring_in(3600));
        assert!(!rendered.contains("refresh"));
        assert!(rendered.contains("acct"));
    }
}
