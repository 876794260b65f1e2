use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::emulator::Emulator;
use super::realtime_database::RealtimeDatabase;
use crate::config::StoreConfig;
use crate::environment::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::models::Slot;

/// An absolute location in the hierarchical database, kept as unescaped segments.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DbPath(Vec<String>);

impl DbPath {
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DbPath(segments.into_iter().map(Into::into).collect())
    }

    /// `/users/{sanitizedId}`: the container of an identity's slots.
    pub fn user_slots(sanitized_id: &str) -> Self {
        Self::from_segments(["users", sanitized_id])
    }

    /// `/users/{sanitizedId}/{slot}`
    pub fn slot(sanitized_id: &str, slot: Slot) -> Self {
        Self::from_segments(["users", sanitized_id, slot.as_str()])
    }

    /// `/owners/{sanitizedId}`
    pub fn owner(sanitized_id: &str) -> Self {
        Self::from_segments(["owners", sanitized_id])
    }

    /// `/registry/{registryId}`
    pub fn registry(registry_id: &str) -> Self {
        Self::from_segments(["registry", registry_id])
    }

    /// `/registryOwners/{registryId}`
    pub fn registry_owner(registry_id: &str) -> Self {
        Self::from_segments(["registryOwners", registry_id])
    }

    /// `/adminRegistry/{accountId}`
    pub fn admin_registry(account_id: &str) -> Self {
        Self::from_segments(["adminRegistry", account_id])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The path as a multi-path update key: segments joined by `/`, no leading slash.
    pub fn key(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.key())
    }
}

impl fmt::Debug for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DbPath({})", self)
    }
}

/// A set of path → value changes applied in one request. A `null` value deletes the path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiPathUpdate {
    changes: Vec<(DbPath, Value)>,
}

impl MultiPathUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: DbPath, value: Value) -> Self {
        self.changes.push((path, value));
        self
    }

    pub fn remove(self, path: DbPath) -> Self {
        self.set(path, Value::Null)
    }

    pub fn changes(&self) -> &[(DbPath, Value)] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The request body: one top-level key per path.
    pub fn to_body(&self) -> Value {
        let map: Map<String, Value> = self
            .changes
            .iter()
            .map(|(path, value)| (path.key(), value.clone()))
            .collect();
        Value::Object(map)
    }
}

/// The BackingStore trait abstracts the hierarchical key-value database.
///
/// Every call carries the caller's bearer token and cancellation token. Reads return
/// `Ok(None)` for a missing path; deleting a missing path succeeds.
#[async_trait]
pub trait BackingStore: Send + Sync {
    fn get_name(&self) -> &str;

    async fn get(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>>;

    /// Like `get`, but children of an object are reported as `true` instead of their values.
    async fn get_shallow(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>>;

    async fn put(
        &self,
        path: &DbPath,
        value: &Value,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()>;

    async fn delete(&self, path: &DbPath, token: &str, cancel: &CancellationToken)
        -> SyncResult<()>;

    /// Applies every change in `update` atomically: all land or none do.
    async fn patch(
        &self,
        update: &MultiPathUpdate,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()>;
}

/// Maps a backing-store response status onto the error taxonomy.
///
/// 2xx yields the body, 404 yields `None`, 401/403 are authentication failures and
/// anything else is a store failure.
pub fn classify_response(status: u16, body: String) -> SyncResult<Option<String>> {
    match status {
        200..=299 => Ok(Some(body)),
        404 => Ok(None),
        401 | 403 => Err(SyncError::auth_failure(status, &body)),
        _ => Err(SyncError::backing_store(status, &body)),
    }
}

/// Parses a read body; a JSON `null` means the path is absent.
pub fn parse_read_body(body: Option<String>) -> SyncResult<Option<Value>> {
    let Some(body) = body else {
        return Ok(None);
    };
    if body.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(&body)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

/// Creates the backing store named by the config.
///
/// The emulator variant reuses `emulator` so identity and store share one instance.
pub fn create_store(
    config: &StoreConfig,
    client: Client,
    connectivity: Connectivity,
    emulator: Option<Arc<Emulator>>,
) -> Arc<dyn BackingStore> {
    match config {
        StoreConfig::RealtimeDatabase(db_config) => {
            info!("Using realtime database store at {}", db_config.base_url);
            Arc::new(RealtimeDatabase::new(db_config, client, connectivity)) as Arc<dyn BackingStore>
        }
        StoreConfig::Emulator => {
            info!("Using in-process emulator store.");
            emulator.unwrap_or_else(|| Arc::new(Emulator::new(connectivity))) as Arc<dyn BackingStore>
        }
    }
}
