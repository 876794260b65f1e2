use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::try_join_all;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use super::ownership::OwnershipRegistry;
use crate::auth::AuthRetryExecutor;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    PlayerIdentity, RegistryEntry, Session, Slot, SlotNode, UPLOADER_ACCOUNT_FIELD,
    UPLOADER_ID_FIELD, UPLOADER_NAME_FIELD,
};
use crate::store::{BackingStore, DbPath, MultiPathUpdate};
use crate::utils::log_throttle::advisory_failure;

/// Save, load, list and delete modlists in the five slots of an identity.
///
/// Every operation establishes ownership first. Writes touching a slot and its public
/// mirror go out as one multi-path update so they land together or not at all.
pub struct ModlistStore {
    store: Arc<dyn BackingStore>,
    executor: AuthRetryExecutor,
    ownership: OwnershipRegistry,
    advisory: TaskTracker,
}

/// Overwrites the uploader fields so readers can trust they were not forged.
fn stamp_uploader(content: &Map<String, Value>, identity: &PlayerIdentity, account_id: &str) -> Value {
    let mut stamped = content.clone();
    stamped.insert(
        UPLOADER_NAME_FIELD.to_string(),
        Value::String(identity.display_name.clone()),
    );
    stamped.insert(
        UPLOADER_ID_FIELD.to_string(),
        Value::String(identity.sanitized_id.clone()),
    );
    stamped.insert(
        UPLOADER_ACCOUNT_FIELD.to_string(),
        Value::String(account_id.to_string()),
    );
    Value::Object(stamped)
}

/// The `registryId` of a stored slot node, if it has one.
fn registry_id_of(node: &Value) -> Option<String> {
    node.get("registryId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Slot content is stored as JSON text; older nodes may hold the object itself.
fn content_of(node: &Value) -> SyncResult<Option<Value>> {
    match node.get("content") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(serde_json::from_str(text)?)),
        Some(other) => Ok(Some(other.clone())),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ModlistStore {
    pub fn new(store: Arc<dyn BackingStore>, executor: AuthRetryExecutor) -> Self {
        let ownership = OwnershipRegistry::new(store.clone(), executor.clone());
        Self {
            store,
            executor,
            ownership,
            advisory: TaskTracker::new(),
        }
    }

    pub fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    async fn read_slot(
        &self,
        identity: &PlayerIdentity,
        slot: Slot,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        let path = DbPath::slot(&identity.sanitized_id, slot);
        self.executor
            .send_with_retry(cancel, |session: Session| {
                let path = &path;
                async move { self.store.get(path, &session.id_token, cancel).await }
            })
            .await
    }

    /// Stores `content` in `slot` and mirrors it to the public registry.
    ///
    /// `content` must be a JSON object. The slot keeps its registry id across saves; a
    /// slot saved for the first time gets a new one.
    pub async fn save(
        &self,
        identity: &PlayerIdentity,
        slot: Slot,
        content: &Value,
        cancel: &CancellationToken,
    ) -> SyncResult<SlotNode> {
        let Value::Object(fields) = content else {
            return Err(SyncError::InvalidContent(
                "modlist content must be a JSON object".to_string(),
            ));
        };
        self.ownership.ensure_ownership(identity, cancel).await?;

        let existing = self.read_slot(identity, slot, cancel).await?;
        let registry_id = existing
            .as_ref()
            .and_then(registry_id_of)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let date_added = now_rfc3339();

        let node = self
            .executor
            .send_with_retry(cancel, |session: Session| {
                self.write_slot(session, identity, slot, fields, &registry_id, &date_added, cancel)
            })
            .await?;

        info!(
            event_name = "modlist.save",
            event_domain = "sync",
            identity = %identity.sanitized_id,
            slot = %slot,
            "Saved modlist"
        );
        self.record_admin_index(identity, cancel);
        Ok(node)
    }

    /// One multi-path update: the private slot node, the registry owner and the mirror.
    #[allow(clippy::too_many_arguments)]
    async fn write_slot(
        &self,
        session: Session,
        identity: &PlayerIdentity,
        slot: Slot,
        fields: &Map<String, Value>,
        registry_id: &str,
        date_added: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<SlotNode> {
        let content =
            serde_json::to_string(&stamp_uploader(fields, identity, &session.account_id))?;
        let node = SlotNode {
            registry_id: Some(registry_id.to_string()),
            content: content.clone(),
            date_added: date_added.to_string(),
        };
        let entry = RegistryEntry {
            content,
            date_added: date_added.to_string(),
        };
        let update = MultiPathUpdate::new()
            .set(
                DbPath::slot(&identity.sanitized_id, slot),
                serde_json::to_value(&node)?,
            )
            .set(
                DbPath::registry_owner(registry_id),
                Value::String(session.account_id.clone()),
            )
            .set(DbPath::registry(registry_id), serde_json::to_value(&entry)?);
        self.store.patch(&update, &session.id_token, cancel).await?;
        Ok(node)
    }

    /// Records the identity under `/adminRegistry/{accountId}` in the background.
    fn record_admin_index(&self, identity: &PlayerIdentity, cancel: &CancellationToken) {
        let store = self.store.clone();
        let executor = self.executor.clone();
        let cancel = cancel.child_token();
        let sanitized_id = identity.sanitized_id.clone();
        let display_name = identity.display_name.clone();
        self.advisory.spawn(async move {
            let result = executor
                .send_with_retry(&cancel, |session: Session| {
                    let store = store.clone();
                    let cancel = cancel.clone();
                    let value = json!({
                        "sanitizedId": sanitized_id,
                        "displayName": display_name,
                        "lastSeen": now_rfc3339(),
                    });
                    async move {
                        store
                            .put(
                                &DbPath::admin_registry(&session.account_id),
                                &value,
                                &session.id_token,
                                &cancel,
                            )
                            .await
                    }
                })
                .await;
            if let Err(e) = result {
                advisory_failure("modlist.admin_index", &e);
            }
        });
    }

    /// Waits for background writes started by earlier saves.
    pub async fn flush_advisory(&self) {
        self.advisory.close();
        self.advisory.wait().await;
        self.advisory.reopen();
    }

    /// Returns the content stored in `slot`, or `None` for an empty slot.
    pub async fn load(
        &self,
        identity: &PlayerIdentity,
        slot: Slot,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        self.ownership.ensure_ownership(identity, cancel).await?;
        match self.read_slot(identity, slot, cancel).await? {
            Some(node) => content_of(&node),
            None => Ok(None),
        }
    }

    /// Which of the five slots currently hold data.
    pub async fn list_slots(
        &self,
        identity: &PlayerIdentity,
        cancel: &CancellationToken,
    ) -> SyncResult<BTreeSet<Slot>> {
        self.ownership.ensure_ownership(identity, cancel).await?;
        let path = DbPath::user_slots(&identity.sanitized_id);
        let listing = self
            .executor
            .send_with_retry(cancel, |session: Session| {
                let path = &path;
                async move { self.store.get_shallow(path, &session.id_token, cancel).await }
            })
            .await?;

        let slots = match listing {
            Some(Value::Object(children)) => children
                .keys()
                .filter_map(|key| key.parse::<Slot>().ok())
                .collect(),
            _ => BTreeSet::new(),
        };
        debug!(identity = %identity.sanitized_id, count = slots.len(), "Listed slots");
        Ok(slots)
    }

    /// Empties `slot` together with its registry mirror. Deleting an empty slot succeeds.
    pub async fn delete(
        &self,
        identity: &PlayerIdentity,
        slot: Slot,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.ownership.ensure_ownership(identity, cancel).await?;
        self.delete_owned(identity, slot, cancel).await
    }

    async fn delete_owned(
        &self,
        identity: &PlayerIdentity,
        slot: Slot,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let Some(node) = self.read_slot(identity, slot, cancel).await? else {
            debug!(identity = %identity.sanitized_id, slot = %slot, "Slot already empty");
            return Ok(());
        };

        let mut update = MultiPathUpdate::new().remove(DbPath::slot(&identity.sanitized_id, slot));
        if let Some(registry_id) = registry_id_of(&node) {
            update = update
                .remove(DbPath::registry(&registry_id))
                .remove(DbPath::registry_owner(&registry_id));
        }
        self.executor
            .send_with_retry(cancel, |session: Session| {
                let update = &update;
                async move { self.store.patch(update, &session.id_token, cancel).await }
            })
            .await?;

        info!(
            event_name = "modlist.delete",
            event_domain = "sync",
            identity = %identity.sanitized_id,
            slot = %slot,
            "Deleted modlist"
        );
        Ok(())
    }

    /// Deletes every slot, then releases the identity's ownership claim.
    pub async fn delete_all_user_data(
        &self,
        identity: &PlayerIdentity,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let slots = self.list_slots(identity, cancel).await?;
        // Slots live at disjoint paths, so their deletes can run side by side.
        try_join_all(
            slots
                .into_iter()
                .map(|slot| self.delete_owned(identity, slot, cancel)),
        )
        .await?;

        let owner = DbPath::owner(&identity.sanitized_id);
        self.executor
            .send_with_retry(cancel, |session: Session| {
                let owner = &owner;
                async move { self.store.delete(owner, &session.id_token, cancel).await }
            })
            .await?;
        self.ownership.forget(identity);

        info!(
            event_name = "modlist.delete_all",
            event_domain = "sync",
            identity = %identity.sanitized_id,
            "Deleted all user data"
        );
        Ok(())
    }
}
