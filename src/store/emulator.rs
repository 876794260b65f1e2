//! In-process stand-in for the hosted identity service and realtime database.
//!
//! The emulator mints anonymous accounts and enforces the same owner rules the hosted
//! security rules do, so ownership conflicts and auth retries can be exercised without
//! a network.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::base::{BackingStore, DbPath, MultiPathUpdate};
use crate::environment::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::providers::{IdentityProvider, TokenGrant};
use crate::utils::{cancellable, ensure_online};

/// Lifetime of emulator-issued id tokens.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

const PERMISSION_DENIED: &str = "Permission denied";

#[derive(Default)]
struct EmulatorState {
    root: Value,
    id_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    accounts: HashSet<String>,
    sign_ins: usize,
}

pub struct Emulator {
    state: Mutex<EmulatorState>,
    token_lifetime_secs: i64,
    connectivity: Connectivity,
}

impl Emulator {
    pub fn new(connectivity: Connectivity) -> Self {
        Self::with_token_lifetime(connectivity, DEFAULT_TOKEN_LIFETIME_SECS)
    }

    pub fn with_token_lifetime(connectivity: Connectivity, token_lifetime_secs: i64) -> Self {
        Self {
            state: Mutex::new(EmulatorState {
                root: Value::Object(Map::new()),
                ..Default::default()
            }),
            token_lifetime_secs,
            connectivity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmulatorState> {
        // State is only mutated after every check passes; a poisoned lock holds a whole tree.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Invalidates every outstanding id token; refresh tokens keep working.
    pub fn expire_id_tokens(&self) {
        self.lock().id_tokens.clear();
    }

    /// Invalidates every outstanding refresh token.
    pub fn revoke_refresh_tokens(&self) {
        self.lock().refresh_tokens.clear();
    }

    /// Reads a value directly, bypassing the access rules.
    pub fn value_at(&self, path: &DbPath) -> Option<Value> {
        lookup(&self.lock().root, path.segments()).cloned()
    }

    /// Writes a value directly, bypassing the access rules.
    pub fn seed(&self, path: &DbPath, value: Value) {
        write_value(&mut self.lock().root, path.segments(), value);
    }

    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    /// Number of anonymous sign-ins served so far.
    pub fn sign_in_count(&self) -> usize {
        self.lock().sign_ins
    }

    fn issue_tokens(&self, state: &mut EmulatorState, account_id: &str) -> TokenGrant {
        let id_token = format!("emu-id-{}", Uuid::new_v4());
        let refresh_token = format!("emu-refresh-{}", Uuid::new_v4());
        state
            .id_tokens
            .insert(id_token.clone(), account_id.to_string());
        state
            .refresh_tokens
            .insert(refresh_token.clone(), account_id.to_string());
        TokenGrant {
            id_token,
            refresh_token,
            expires_in_secs: self.token_lifetime_secs,
            account_id: account_id.to_string(),
        }
    }

    async fn guarded<T, F>(&self, cancel: &CancellationToken, op: F) -> SyncResult<T>
    where
        F: FnOnce(&mut EmulatorState) -> SyncResult<T>,
    {
        ensure_online(&self.connectivity)?;
        cancellable(cancel, async { op(&mut self.lock()) }).await
    }
}

fn caller(state: &EmulatorState, token: &str) -> SyncResult<String> {
    state
        .id_tokens
        .get(token)
        .cloned()
        .ok_or_else(|| SyncError::auth_failure(401, "Auth token is expired"))
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.get(segment.as_str()))
}

/// Drops `null` leaves and objects left empty by that, as the hosted database does.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        other => Some(other),
    }
}

fn write_value(root: &mut Value, segments: &[String], value: Value) {
    let Some(value) = prune(value) else {
        remove_value(root, segments);
        return;
    };
    let mut node = root;
    for segment in segments {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map.entry(segment.clone()).or_insert(Value::Null);
    }
    *node = value;
}

/// Removes the value at `segments`; returns whether the parent is now empty.
fn remove_value(root: &mut Value, segments: &[String]) -> bool {
    match segments.split_first() {
        None => {
            *root = Value::Object(Map::new());
            true
        }
        Some((head, rest)) => {
            let Some(map) = root.as_object_mut() else {
                return false;
            };
            let child_empty = match map.get_mut(head.as_str()) {
                None => false,
                Some(_) if rest.is_empty() => true,
                Some(child) => remove_value(child, rest),
            };
            if child_empty {
                map.remove(head.as_str());
            }
            map.is_empty()
        }
    }
}

fn owner_of(root: &Value, collection: &str, key: &str) -> Option<String> {
    root.get(collection)
        .and_then(|c| c.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn can_read(root: &Value, segments: &[String], account: &str) -> bool {
    match segments {
        [c, id, ..] if c == "users" => owner_of(root, "owners", id).as_deref() == Some(account),
        [c, acct, ..] if c == "adminRegistry" => acct == account,
        [c, ..] if c == "owners" || c == "registry" || c == "registryOwners" => true,
        _ => false,
    }
}

/// Evaluated against the state before the write, for every path of a patch.
fn can_write(root: &Value, segments: &[String], value: &Value, account: &str) -> bool {
    let claims_self = value.is_null() || value.as_str() == Some(account);
    let free_or_mine = |owner: Option<String>| owner.map_or(true, |o| o == account);
    match segments {
        [c, id] if c == "owners" => claims_self && free_or_mine(owner_of(root, "owners", id)),
        [c, id, ..] if c == "users" => owner_of(root, "owners", id).as_deref() == Some(account),
        [c, rid] if c == "registryOwners" => {
            claims_self && free_or_mine(owner_of(root, "registryOwners", rid))
        }
        [c, rid, ..] if c == "registry" => free_or_mine(owner_of(root, "registryOwners", rid)),
        [c, acct, ..] if c == "adminRegistry" => acct == account,
        _ => false,
    }
}

fn overlapping(a: &[String], b: &[String]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

fn shallow(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.keys()
                .map(|k| (k.clone(), Value::Bool(true)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl BackingStore for Emulator {
    fn get_name(&self) -> &str {
        "emulator"
    }

    async fn get(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        self.guarded(cancel, |state| {
            let account = caller(state, token)?;
            if !can_read(&state.root, path.segments(), &account) {
                return Err(SyncError::auth_failure(401, PERMISSION_DENIED));
            }
            Ok(lookup(&state.root, path.segments()).cloned())
        })
        .await
    }

    async fn get_shallow(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        self.get(path, token, cancel)
            .await
            .map(|value| value.as_ref().map(shallow))
    }

    async fn put(
        &self,
        path: &DbPath,
        value: &Value,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.patch(&MultiPathUpdate::new().set(path.clone(), value.clone()), token, cancel)
            .await
    }

    async fn delete(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.patch(&MultiPathUpdate::new().remove(path.clone()), token, cancel)
            .await
    }

    async fn patch(
        &self,
        update: &MultiPathUpdate,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.guarded(cancel, |state| {
            let account = caller(state, token)?;
            let changes = update.changes();
            for (i, (path, value)) in changes.iter().enumerate() {
                if changes[..i]
                    .iter()
                    .any(|(other, _)| overlapping(path.segments(), other.segments()))
                {
                    return Err(SyncError::backing_store(
                        400,
                        "Invalid data; paths in a multi-path update overlap",
                    ));
                }
                if !can_write(&state.root, path.segments(), value, &account) {
                    debug!(path = %path, "Emulator rejected write");
                    return Err(SyncError::auth_failure(401, PERMISSION_DENIED));
                }
            }
            for (path, value) in changes {
                write_value(&mut state.root, path.segments(), value.clone());
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl IdentityProvider for Emulator {
    fn get_name(&self) -> &str {
        "emulator"
    }

    async fn sign_in_anonymously(&self, cancel: &CancellationToken) -> SyncResult<TokenGrant> {
        self.guarded(cancel, |state| {
            let account_id = Uuid::new_v4().simple().to_string();
            state.accounts.insert(account_id.clone());
            state.sign_ins += 1;
            Ok(self.issue_tokens(state, &account_id))
        })
        .await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<TokenGrant> {
        self.guarded(cancel, |state| {
            let account_id = state
                .refresh_tokens
                .remove(refresh_token)
                .ok_or_else(|| SyncError::identity_service(400, "INVALID_REFRESH_TOKEN"))?;
            Ok(self.issue_tokens(state, &account_id))
        })
        .await
    }

    async fn delete_account(&self, id_token: &str, cancel: &CancellationToken) -> SyncResult<()> {
        self.guarded(cancel, |state| {
            let account_id = state
                .id_tokens
                .get(id_token)
                .cloned()
                .ok_or_else(|| SyncError::identity_service(400, "INVALID_ID_TOKEN"))?;
            state.accounts.remove(&account_id);
            state.id_tokens.retain(|_, acct| *acct != account_id);
            state.refresh_tokens.retain(|_, acct| *acct != account_id);
            Ok(())
        })
        .await
    }
}
