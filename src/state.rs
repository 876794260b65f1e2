//! Shared engine state.
//!
//! Bundles the components every command needs: the connectivity flag, the
//! authenticator, the slot store and the source of the current player identity.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::ConfigV1;
use crate::environment::{Connectivity, IdentitySource};
use crate::error::SyncResult;
use crate::models::PlayerIdentity;
use crate::sync::ModlistStore;

/// The assembled sync engine.
///
/// Cloning is cheap; every component is shared.
#[derive(Clone)]
pub struct SyncEngine {
    /// Configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    /// Process-wide internet-access flag.
    pub connectivity: Connectivity,
    /// Anonymous-identity token cache.
    pub authenticator: Arc<Authenticator>,
    /// Slot operations, ownership included.
    pub modlists: Arc<ModlistStore>,
    identity_source: Arc<dyn IdentitySource>,
}

impl SyncEngine {
    pub fn new(
        config: Arc<ConfigV1>,
        connectivity: Connectivity,
        authenticator: Arc<Authenticator>,
        modlists: Arc<ModlistStore>,
        identity_source: Arc<dyn IdentitySource>,
    ) -> Self {
        Self {
            config,
            connectivity,
            authenticator,
            modlists,
            identity_source,
        }
    }

    /// Resolves the current player, failing with `MissingIdentity` when the host has
    /// not produced one yet.
    pub fn player(&self) -> SyncResult<PlayerIdentity> {
        PlayerIdentity::from_external(self.identity_source.current_identity())
    }
}
