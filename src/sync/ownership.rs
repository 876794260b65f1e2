use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthRetryExecutor;
use crate::error::{SyncError, SyncResult};
use crate::models::PlayerIdentity;
use crate::store::{BackingStore, DbPath};
use crate::utils::cancellable;

/// Binds each sanitized identity to exactly one anonymous account.
///
/// The backing store's write rules are what enforce exclusivity; the read before the
/// claim and the process-local cache only save round trips.
pub struct OwnershipRegistry {
    store: Arc<dyn BackingStore>,
    executor: AuthRetryExecutor,
    claimed: Mutex<HashMap<String, String>>,
    claim_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OwnershipRegistry {
    pub fn new(store: Arc<dyn BackingStore>, executor: AuthRetryExecutor) -> Self {
        Self {
            store,
            executor,
            claimed: Mutex::new(HashMap::new()),
            claim_locks: Mutex::new(HashMap::new()),
        }
    }

    fn cached_owner(&self, sanitized_id: &str) -> Option<String> {
        self.claimed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(sanitized_id)
            .cloned()
    }

    fn claim_lock(&self, sanitized_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.claim_locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(sanitized_id.to_string())
            .or_default()
            .clone()
    }

    /// Guarantees the current session's account owns `identity`, claiming it if unowned.
    ///
    /// Returns the owning account id. Fails with [`SyncError::OwnershipConflict`] when a
    /// different account holds the claim or the store rejects our claim write.
    pub async fn ensure_ownership(
        &self,
        identity: &PlayerIdentity,
        cancel: &CancellationToken,
    ) -> SyncResult<String> {
        let sanitized_id = identity.sanitized_id.as_str();
        let account_id = self
            .executor
            .authenticator()
            .get_session(cancel)
            .await?
            .account_id;
        if self.cached_owner(sanitized_id).as_deref() == Some(account_id.as_str()) {
            return Ok(account_id);
        }

        let lock = self.claim_lock(sanitized_id);
        let result = self.claim_locked(sanitized_id, &lock, account_id, cancel).await;
        self.release_claim_lock(sanitized_id, lock);
        result
    }

    /// Drops the identity's claim lock once nobody else holds or waits on it.
    fn release_claim_lock(&self, sanitized_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.claim_locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference lives in the map, the other is ours.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(sanitized_id);
        }
    }

    async fn claim_locked(
        &self,
        sanitized_id: &str,
        lock: &tokio::sync::Mutex<()>,
        account_id: String,
        cancel: &CancellationToken,
    ) -> SyncResult<String> {
        let _guard = cancellable(cancel, async { Ok(lock.lock().await) }).await?;
        if self.cached_owner(sanitized_id).as_deref() == Some(account_id.as_str()) {
            return Ok(account_id);
        }

        let path = DbPath::owner(sanitized_id);
        let write_rejected = AtomicBool::new(false);
        let outcome = self
            .executor
            .send_with_retry(cancel, |session| {
                let path = &path;
                let write_rejected = &write_rejected;
                async move {
                    // Only a rejection of this attempt's own write counts.
                    write_rejected.store(false, Ordering::SeqCst);
                    let current = self.store.get(path, &session.id_token, cancel).await?;
                    match current.as_ref().and_then(Value::as_str) {
                        Some(owner) if owner == session.account_id => {
                            debug!(identity = %sanitized_id, "Identity already owned by this account");
                        }
                        Some(_) => {
                            return Err(SyncError::OwnershipConflict {
                                sanitized_id: sanitized_id.to_string(),
                            })
                        }
                        None => {
                            let value = Value::String(session.account_id.clone());
                            let written =
                                self.store.put(path, &value, &session.id_token, cancel).await;
                            write_rejected.store(
                                matches!(&written, Err(e) if e.is_auth_failure()),
                                Ordering::SeqCst,
                            );
                            written?;
                            info!(
                                event_name = "ownership.claim",
                                event_domain = "sync",
                                identity = %sanitized_id,
                                "Claimed identity"
                            );
                        }
                    }
                    Ok::<_, SyncError>(session.account_id)
                }
            })
            .await;

        let owner = match outcome {
            Ok(owner) => owner,
            Err(e) if e.is_auth_failure() && write_rejected.load(Ordering::SeqCst) => {
                // Another account won the race between our read and our write.
                warn!(identity = %sanitized_id, "Claim write rejected: {}", e);
                return Err(SyncError::OwnershipConflict {
                    sanitized_id: sanitized_id.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        self.claimed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(sanitized_id.to_string(), owner.clone());
        Ok(owner)
    }

    /// Drops the cached claim so the next call re-verifies against the store.
    pub fn forget(&self, identity: &PlayerIdentity) {
        self.claimed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&identity.sanitized_id);
    }

    pub fn is_cached(&self, identity: &PlayerIdentity) -> bool {
        self.cached_owner(&identity.sanitized_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthStateFile, Authenticator};
    use crate::config::RealtimeDatabaseConfig;
    use crate::environment::{Connectivity, MemoryBackupFlag, NoopStatusSink};
    use crate::store::{Emulator, MultiPathUpdate, RealtimeDatabase};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn create_test_registry(dir: &TempDir, emulator: Arc<Emulator>) -> OwnershipRegistry {
        let auth = Authenticator::new(
            emulator.clone(),
            AuthStateFile::new(
                dir.path().join("cloud_auth.json"),
                Arc::new(MemoryBackupFlag::default()),
            ),
            Connectivity::default(),
            Arc::new(NoopStatusSink),
        );
        OwnershipRegistry::new(emulator, AuthRetryExecutor::new(Arc::new(auth)))
    }

    fn player() -> PlayerIdentity {
        PlayerIdentity::new("player.one", "One").unwrap()
    }

    #[tokio::test]
    async fn test_first_claim_writes_owner() {
        let dir = TempDir::new().unwrap();
        let emulator = Arc::new(Emulator::new(Connectivity::default()));
        let registry = create_test_registry(&dir, emulator.clone());

        let account = registry
            .ensure_ownership(&player(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(emulator.value_at(&DbPath::owner("player_one")), Some(json!(account)));
        assert!(registry.is_cached(&player()));

        // Repeat claims are no-ops.
        let again = registry
            .ensure_ownership(&player(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again, account);
    }

    #[tokio::test]
    async fn test_other_account_conflicts() {
        let emulator = Arc::new(Emulator::new(Connectivity::default()));
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = create_test_registry(&dir_a, emulator.clone());
        let b = create_test_registry(&dir_b, emulator.clone());
        let cancel = CancellationToken::new();

        a.ensure_ownership(&player(), &cancel).await.unwrap();
        let err = b.ensure_ownership(&player(), &cancel).await.unwrap_err();
        assert_eq!(
            err,
            SyncError::OwnershipConflict {
                sanitized_id: "player_one".to_string()
            }
        );
        assert!(!b.is_cached(&player()));
    }

    /// The store reports no owner on read, then rejects the claim write: another account
    /// claimed the identity in between.
    #[tokio::test]
    async fn test_rejected_claim_write_is_conflict() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/owners/x.json")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("null")
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/owners/x.json")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":"Permission denied"}"#)
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let emulator = Arc::new(Emulator::new(Connectivity::default()));
        let store = RealtimeDatabase::new(
            &RealtimeDatabaseConfig {
                base_url: server.url(),
                timeout_in_ms: 2000,
            },
            reqwest::Client::new(),
            Connectivity::default(),
        );
        let auth = Authenticator::new(
            emulator,
            AuthStateFile::new(
                dir.path().join("cloud_auth.json"),
                Arc::new(MemoryBackupFlag::default()),
            ),
            Connectivity::default(),
            Arc::new(NoopStatusSink),
        );
        let registry =
            OwnershipRegistry::new(Arc::new(store), AuthRetryExecutor::new(Arc::new(auth)));

        let identity = PlayerIdentity::new("x", "X").unwrap();
        let err = registry
            .ensure_ownership(&identity, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::OwnershipConflict {
                sanitized_id: "x".to_string()
            }
        );
        put.assert_async().await;
    }

    /// Answers the first owner read with `null`, every later read with 401, and
    /// rejects every write.
    #[derive(Default)]
    struct FlakyOwnerStore {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl BackingStore for FlakyOwnerStore {
        fn get_name(&self) -> &str {
            "flaky"
        }

        async fn get(
            &self,
            _path: &DbPath,
            _token: &str,
            _cancel: &CancellationToken,
        ) -> SyncResult<Option<Value>> {
            match self.reads.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(None),
                _ => Err(SyncError::auth_failure(401, "Auth token is expired")),
            }
        }

        async fn get_shallow(
            &self,
            path: &DbPath,
            token: &str,
            cancel: &CancellationToken,
        ) -> SyncResult<Option<Value>> {
            self.get(path, token, cancel).await
        }

        async fn put(
            &self,
            _path: &DbPath,
            _value: &Value,
            _token: &str,
            _cancel: &CancellationToken,
        ) -> SyncResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::auth_failure(401, "Permission denied"))
        }

        async fn delete(
            &self,
            _path: &DbPath,
            _token: &str,
            _cancel: &CancellationToken,
        ) -> SyncResult<()> {
            Ok(())
        }

        async fn patch(
            &self,
            _update: &MultiPathUpdate,
            _token: &str,
            _cancel: &CancellationToken,
        ) -> SyncResult<()> {
            Ok(())
        }
    }

    /// A rejected claim write followed by a rejected read on the retry is an auth
    /// failure of the read, not a lost claim race.
    #[tokio::test]
    async fn test_rejected_read_after_rejected_write_stays_auth_failure() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FlakyOwnerStore::default());
        let auth = Authenticator::new(
            Arc::new(Emulator::new(Connectivity::default())),
            AuthStateFile::new(
                dir.path().join("cloud_auth.json"),
                Arc::new(MemoryBackupFlag::default()),
            ),
            Connectivity::default(),
            Arc::new(NoopStatusSink),
        );
        let registry = OwnershipRegistry::new(store.clone(), AuthRetryExecutor::new(Arc::new(auth)));

        let err = registry
            .ensure_ownership(&PlayerIdentity::new("x", "X").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_auth_failure(), "unexpected error {:?}", err);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_claim_locks_are_released() {
        let emulator = Arc::new(Emulator::new(Connectivity::default()));
        let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let a = create_test_registry(&dir_a, emulator.clone());
        let b = create_test_registry(&dir_b, emulator);
        let cancel = CancellationToken::new();

        for n in 0..5 {
            let identity = PlayerIdentity::new(&format!("player.{}", n), "P").unwrap();
            a.ensure_ownership(&identity, &cancel).await.unwrap();
        }
        assert!(b.ensure_ownership(&player(), &cancel).await.is_ok());
        assert!(a.ensure_ownership(&player(), &cancel).await.is_err());

        assert!(a.claim_locks.lock().unwrap().is_empty());
        assert!(b.claim_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forget_forces_reverification() {
        let dir = TempDir::new().unwrap();
        let emulator = Arc::new(Emulator::new(Connectivity::default()));
        let registry = create_test_registry(&dir, emulator.clone());
        let cancel = CancellationToken::new();

        registry.ensure_ownership(&player(), &cancel).await.unwrap();
        registry.forget(&player());
        assert!(!registry.is_cached(&player()));
        registry.ensure_ownership(&player(), &cancel).await.unwrap();
        assert!(registry.is_cached(&player()));
    }

    #[tokio::test]
    async fn test_cancelled_claim_is_not_a_conflict() {
        let dir = TempDir::new().unwrap();
        let emulator = Arc::new(Emulator::new(Connectivity::default()));
        let registry = create_test_registry(&dir, emulator);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            registry.ensure_ownership(&player(), &cancel).await,
            Err(SyncError::Cancelled)
        );
    }
}
