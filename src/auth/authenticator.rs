use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::persistence::AuthStateFile;
use crate::environment::{Connectivity, StatusSink};
use crate::error::{SyncError, SyncResult};
use crate::models::{AuthState, Session};
use crate::providers::{IdentityProvider, TokenGrant};
use crate::utils::{cancellable, ensure_online};

#[derive(Default)]
struct CachedState {
    loaded: bool,
    auth: Option<AuthState>,
    force_refresh: bool,
}

impl CachedState {
    /// The cached session, unless it is expired or has been marked stale.
    fn usable(&self) -> Option<Session> {
        match &self.auth {
            Some(auth) if !self.force_refresh && !auth.is_expired() => Some(auth.session()),
            _ => None,
        }
    }

    fn refresh_token(&self) -> Option<String> {
        self.auth
            .as_ref()
            .map(|a| a.refresh_token.clone())
            .filter(|t| !t.is_empty())
    }
}

/// Owns the anonymous-identity lifecycle: sign-in, refresh, persistence and revocation.
///
/// Every public method holds the state mutex for its whole duration, network calls
/// included, so at most one sign-in or refresh is in flight per instance.
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    file: AuthStateFile,
    connectivity: Connectivity,
    status: Arc<dyn StatusSink>,
    state: Mutex<CachedState>,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        file: AuthStateFile,
        connectivity: Connectivity,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        info!(
            "Creating Authenticator with provider '{}' and state file {:?}",
            provider.get_name(),
            file.path()
        );
        Self {
            provider,
            file,
            connectivity,
            status,
            state: Mutex::new(CachedState::default()),
        }
    }

    /// Takes the state lock, loading persisted state on first use.
    async fn lock_loaded(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<MutexGuard<'_, CachedState>> {
        let mut guard = cancellable(cancel, async { Ok(self.state.lock().await) }).await?;
        if !guard.loaded {
            guard.auth = self.file.load().await;
            guard.loaded = true;
            debug!(
                event_name = "auth.load",
                event_domain = "auth",
                found = guard.auth.is_some(),
                "Loaded persisted auth state"
            );
        }
        Ok(guard)
    }

    /// Replaces the cached state with a fresh grant and mirrors it to disk.
    ///
    /// A failed write only costs a sign-in on the next start, so it is logged and the
    /// session is still handed out.
    async fn install(&self, guard: &mut CachedState, grant: TokenGrant) -> SyncResult<Session> {
        let auth = AuthState::issued(
            grant.id_token,
            grant.refresh_token,
            grant.expires_in_secs,
            grant.account_id,
        )?;
        match self.file.save(&auth).await {
            Ok(()) => self.file.backup_once().await,
            Err(e) => warn!(
                event_name = "auth.persist",
                event_domain = "auth",
                "Could not persist auth state: {}",
                e
            ),
        }
        let session = auth.session();
        guard.auth = Some(auth);
        guard.force_refresh = false;
        Ok(session)
    }

    async fn refresh_locked(
        &self,
        guard: &mut CachedState,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Session> {
        debug!(event_name = "auth.refresh", event_domain = "auth", "Refreshing session");
        let grant = self.provider.refresh(refresh_token, cancel).await?;
        self.install(guard, grant).await
    }

    async fn sign_in_locked(
        &self,
        guard: &mut CachedState,
        cancel: &CancellationToken,
    ) -> SyncResult<Session> {
        self.status.report("Signing in to cloud sync...");
        let grant = self.provider.sign_in_anonymously(cancel).await?;
        info!(
            event_name = "auth.sign_in",
            event_domain = "auth",
            account_id = %grant.account_id,
            "Signed in anonymously"
        );
        self.install(guard, grant).await
    }

    /// Returns a valid session, refreshing or signing in as needed.
    pub async fn get_session(&self, cancel: &CancellationToken) -> SyncResult<Session> {
        ensure_online(&self.connectivity)?;
        let mut guard = self.lock_loaded(cancel).await?;
        if let Some(session) = guard.usable() {
            return Ok(session);
        }

        if let Some(refresh_token) = guard.refresh_token() {
            match self.refresh_locked(&mut guard, &refresh_token, cancel).await {
                Ok(session) => return Ok(session),
                Err(e @ (SyncError::Cancelled | SyncError::ConnectivityDisabled)) => {
                    return Err(e)
                }
                Err(e) => warn!(
                    event_name = "auth.refresh",
                    event_domain = "auth",
                    "Refresh failed, signing in again: {}",
                    e
                ),
            }
        }

        self.sign_in_locked(&mut guard, cancel).await
    }

    /// Returns a valid session only if one exists or can be refreshed; never signs in.
    ///
    /// A failed refresh clears both the cached and the persisted state.
    pub async fn try_get_existing_session(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Session>> {
        ensure_online(&self.connectivity)?;
        let mut guard = self.lock_loaded(cancel).await?;
        if let Some(session) = guard.usable() {
            return Ok(Some(session));
        }

        let refreshed = match guard.refresh_token() {
            Some(refresh_token) => self.refresh_locked(&mut guard, &refresh_token, cancel).await,
            None => Err(SyncError::MissingIdentity("no stored session".to_string())),
        };
        match refreshed {
            Ok(session) => Ok(Some(session)),
            Err(e @ (SyncError::Cancelled | SyncError::ConnectivityDisabled)) => Err(e),
            Err(e) => {
                debug!("No existing session available: {}", e);
                guard.auth = None;
                guard.force_refresh = false;
                if let Err(e) = self.file.clear().await {
                    warn!("Could not clear auth state file: {}", e);
                }
                Ok(None)
            }
        }
    }

    /// Forces the next `get_session` to refresh instead of reusing the cached token.
    pub async fn mark_expired(&self, cancel: &CancellationToken) -> SyncResult<()> {
        let mut guard = cancellable(cancel, async { Ok(self.state.lock().await) }).await?;
        if guard.auth.is_some() {
            debug!(event_name = "auth.mark_expired", event_domain = "auth", "Session marked expired");
            guard.force_refresh = true;
        }
        Ok(())
    }

    /// The account of the cached session, if any. Never touches the network.
    pub async fn current_account_id(&self, cancel: &CancellationToken) -> SyncResult<Option<String>> {
        let guard = cancellable(cancel, async { Ok(self.state.lock().await) }).await?;
        Ok(guard.auth.as_ref().map(|a| a.account_id.clone()))
    }

    /// Revokes the remote account, then forgets every local trace of it.
    pub async fn delete_account(&self, cancel: &CancellationToken) -> SyncResult<()> {
        ensure_online(&self.connectivity)?;
        let mut guard = self.lock_loaded(cancel).await?;
        if guard.auth.is_none() {
            debug!("No account to delete");
            return self.file.clear().await;
        }

        let session = match guard.usable() {
            Some(session) => session,
            None => {
                let refresh_token = guard.refresh_token().unwrap_or_default();
                self.refresh_locked(&mut guard, &refresh_token, cancel).await?
            }
        };

        self.status.report("Deleting cloud account...");
        self.provider
            .delete_account(&session.id_token, cancel)
            .await?;

        guard.auth = None;
        guard.force_refresh = false;
        self.file.clear().await?;
        info!(
            event_name = "auth.delete_account",
            event_domain = "auth",
            account_id = %session.account_id,
            "Deleted anonymous account"
        );
        self.status.report("Cloud account deleted.");
        Ok(())
    }
}
