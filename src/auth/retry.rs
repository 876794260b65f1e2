use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::authenticator::Authenticator;
use crate::error::SyncResult;
use crate::models::Session;

/// Runs network operations with a single re-authentication on 401/403.
#[derive(Clone)]
pub struct AuthRetryExecutor {
    authenticator: Arc<Authenticator>,
}

impl AuthRetryExecutor {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    /// Runs `op` with a session. On an authentication failure the token is marked
    /// expired and `op` runs exactly once more with a fresh session; the second
    /// outcome is returned whatever it is.
    pub async fn send_with_retry<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> SyncResult<T>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let session = self.authenticator.get_session(cancel).await?;
        match op(session).await {
            Err(e) if e.is_auth_failure() => {
                debug!(
                    event_name = "auth.retry",
                    event_domain = "auth",
                    "Request rejected ({}); retrying with a fresh token",
                    e
                );
                self.authenticator.mark_expired(cancel).await?;
                let session = self.authenticator.get_session(cancel).await?;
                let result = op(session).await;
                if let Err(e) = &result {
                    if e.is_auth_failure() {
                        warn!(
                            event_name = "auth.retry",
                            event_domain = "auth",
                            "Request rejected again after re-authentication: {}",
                            e
                        );
                    }
                }
                result
            }
            other => other,
        }
    }
}
