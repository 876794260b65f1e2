use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::firebase_provider::FirebaseIdentityProvider;
use crate::config::IdentityConfig;
use crate::environment::Connectivity;
use crate::error::SyncResult;
use crate::store::Emulator;

/// Credentials issued by an identity service on sign-in or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub id_token: String,
    pub refresh_token: String,
    /// Lifetime of `id_token` in seconds.
    pub expires_in_secs: i64,
    pub account_id: String,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in_secs", &self.expires_in_secs)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// An anonymous identity service: issues, refreshes and revokes bearer tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn get_name(&self) -> &str;

    /// Creates a brand-new anonymous account.
    async fn sign_in_anonymously(&self, cancel: &CancellationToken) -> SyncResult<TokenGrant>;

    /// Exchanges a refresh token for a new id token on the same account.
    async fn refresh(&self, refresh_token: &str, cancel: &CancellationToken)
        -> SyncResult<TokenGrant>;

    /// Deletes the account the id token belongs to.
    async fn delete_account(&self, id_token: &str, cancel: &CancellationToken) -> SyncResult<()>;
}

/// Create an identity provider from a given config.
///
/// The emulator variant reuses `emulator` so identity and store share one instance.
pub fn create_identity_provider(
    config: &IdentityConfig,
    client: Client,
    connectivity: Connectivity,
    emulator: Option<Arc<Emulator>>,
) -> Arc<dyn IdentityProvider> {
    match config {
        IdentityConfig::Firebase(cfg) => {
            Arc::new(FirebaseIdentityProvider::new(cfg, client, connectivity))
                as Arc<dyn IdentityProvider>
        }
        IdentityConfig::Emulator => {
            info!("Using in-process emulator identity provider.");
            emulator.unwrap_or_else(|| Arc::new(Emulator::new(connectivity)))
                as Arc<dyn IdentityProvider>
        }
    }
}
