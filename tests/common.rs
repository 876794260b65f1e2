#![allow(dead_code)]

use std::sync::Arc;

use modsync::auth::{AuthRetryExecutor, AuthStateFile, Authenticator};
use modsync::config::config_from_yaml;
use modsync::environment::{
    Connectivity, FixedDirectory, MemoryBackupFlag, NoopStatusSink, StaticIdentity,
};
use modsync::models::ExternalIdentity;
use modsync::startup::{build_engine_with, Collaborators};
use modsync::state::SyncEngine;
use modsync::store::Emulator;
use modsync::sync::ModlistStore;
use tempfile::TempDir;

pub const EMULATOR_CONFIG: &str = r#"
version: "1.0.0"
logging:
  level: "debug"
  format: "console"
identity:
  type: "emulator"
store:
  type: "emulator"
"#;

pub fn external(uid: &str, name: &str) -> ExternalIdentity {
    ExternalIdentity {
        uid: uid.to_string(),
        name: name.to_string(),
    }
}

/// Builds an engine from a YAML config, keeping auth state inside `dir`.
pub fn build_test_engine(
    yaml: &str,
    dir: &TempDir,
    player: Option<ExternalIdentity>,
) -> SyncEngine {
    let config = config_from_yaml(yaml).expect("test config should parse");
    build_engine_with(
        Arc::new(config),
        Collaborators {
            directory: Arc::new(FixedDirectory(dir.path().to_path_buf())),
            identity: Arc::new(StaticIdentity(player)),
            status: Arc::new(NoopStatusSink),
            backup_flag: Arc::new(MemoryBackupFlag::default()),
        },
    )
    .expect("engine should build")
}

/// A slot store whose account lives in `dir`, on a shared emulator.
///
/// Two stores built on one emulator with different directories act as two accounts.
pub fn build_account(emulator: &Arc<Emulator>, dir: &TempDir) -> ModlistStore {
    let authenticator = Authenticator::new(
        emulator.clone(),
        AuthStateFile::new(
            dir.path().join("cloud_auth.json"),
            Arc::new(MemoryBackupFlag::default()),
        ),
        Connectivity::default(),
        Arc::new(NoopStatusSink),
    );
    ModlistStore::new(
        emulator.clone(),
        AuthRetryExecutor::new(Arc::new(authenticator)),
    )
}
