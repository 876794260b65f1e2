//! Engine construction.
//!
//! Builds the shared HTTP client, the identity provider, the backing store, the
//! authenticator and the slot store from the configuration, and wires them into a
//! [`SyncEngine`].

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::{AuthRetryExecutor, AuthStateFile, Authenticator};
use crate::config::{ConfigV1, IdentityConfig, StoreConfig};
use crate::environment::{
    BackupFlagStore, Connectivity, DefaultDirectory, DirectoryLocator, FileBackupFlag,
    FixedDirectory, IdentitySource, StaticIdentity, StatusSink, TracingStatusSink,
};
use crate::error::SyncResult;
use crate::providers::create_identity_provider;
use crate::state::SyncEngine;
use crate::store::{create_store, Emulator};
use crate::sync::ModlistStore;
use crate::utils::http_helpers::build_client;

/// Connection establishment limit for the shared client; request timeouts are per call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Host-supplied collaborators.
pub struct Collaborators {
    pub directory: Arc<dyn DirectoryLocator>,
    pub identity: Arc<dyn IdentitySource>,
    pub status: Arc<dyn StatusSink>,
    pub backup_flag: Arc<dyn BackupFlagStore>,
}

impl Collaborators {
    /// Collaborators derived from the configuration, as used by the command line.
    pub fn from_config(config: &ConfigV1) -> Self {
        let directory: Arc<dyn DirectoryLocator> = match &config.auth_state.directory {
            Some(dir) => Arc::new(FixedDirectory(dir.clone())),
            None => Arc::new(DefaultDirectory),
        };
        let backup_flag = Arc::new(FileBackupFlag::new(&directory.auth_state_dir()));
        Self {
            directory,
            identity: Arc::new(StaticIdentity(config.player.clone())),
            status: Arc::new(TracingStatusSink),
            backup_flag,
        }
    }
}

/// Builds the engine with collaborators taken from the configuration.
pub fn build_engine(config: Arc<ConfigV1>) -> SyncResult<SyncEngine> {
    let collaborators = Collaborators::from_config(&config);
    build_engine_with(config, collaborators)
}

/// Builds the engine around host-supplied collaborators.
///
/// When both the identity and the store sections select the emulator, they share one
/// in-process instance so its accounts can act on its data.
pub fn build_engine_with(
    config: Arc<ConfigV1>,
    collaborators: Collaborators,
) -> SyncResult<SyncEngine> {
    let connectivity = Connectivity::new(!config.offline);
    let client = build_client(CONNECT_TIMEOUT)?;

    let wants_emulator = matches!(config.identity, IdentityConfig::Emulator)
        || matches!(config.store, StoreConfig::Emulator);
    let emulator = wants_emulator.then(|| Arc::new(Emulator::new(connectivity.clone())));

    let provider = create_identity_provider(
        &config.identity,
        client.clone(),
        connectivity.clone(),
        emulator.clone(),
    );
    let store = create_store(&config.store, client, connectivity.clone(), emulator);

    let auth_path = collaborators
        .directory
        .auth_state_dir()
        .join(&config.auth_state.file_name);
    info!("Auth state file: {:?}", auth_path);
    let authenticator = Arc::new(Authenticator::new(
        provider,
        AuthStateFile::new(auth_path, collaborators.backup_flag),
        connectivity.clone(),
        collaborators.status,
    ));

    let modlists = Arc::new(ModlistStore::new(
        store,
        AuthRetryExecutor::new(authenticator.clone()),
    ));

    Ok(SyncEngine::new(
        config,
        connectivity,
        authenticator,
        modlists,
        collaborators.identity,
    ))
}
