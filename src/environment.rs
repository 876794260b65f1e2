//! Collaborators supplied by the host application.
//!
//! These are interfaces only: where the auth file lives, who the current player is,
//! where progress messages go, and whether the auth file has been backed up already.
//! Status and backup-flag calls are best effort; implementations must not panic.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::models::ExternalIdentity;

/// Provides the directory the auth-state file rests in.
pub trait DirectoryLocator: Send + Sync {
    fn auth_state_dir(&self) -> PathBuf;
}

/// A directory fixed at construction time (config override, tests).
pub struct FixedDirectory(pub PathBuf);

impl DirectoryLocator for FixedDirectory {
    fn auth_state_dir(&self) -> PathBuf {
        self.0.clone()
    }
}

/// The platform data directory, e.g. `~/.local/share/modsync` on Linux.
pub struct DefaultDirectory;

impl DirectoryLocator for DefaultDirectory {
    fn auth_state_dir(&self) -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("modsync")
    }
}

/// Supplies the player's external UID/name, if the game has produced one yet.
pub trait IdentitySource: Send + Sync {
    fn current_identity(&self) -> Option<ExternalIdentity>;
}

/// An identity known up front (CLI config, tests).
pub struct StaticIdentity(pub Option<ExternalIdentity>);

impl IdentitySource for StaticIdentity {
    fn current_identity(&self) -> Option<ExternalIdentity> {
        self.0.clone()
    }
}

/// Receives human-readable progress messages.
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str);
}

pub struct NoopStatusSink;

impl StatusSink for NoopStatusSink {
    fn report(&self, _message: &str) {}
}

/// Forwards status messages to the log.
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&self, message: &str) {
        info!(event_name = "status", event_domain = "sync", "{}", message);
    }
}

/// Remembers whether the one-time auth-file backup has been made.
pub trait BackupFlagStore: Send + Sync {
    fn backup_created(&self) -> bool;
    fn mark_backup_created(&self);
}

#[derive(Default)]
pub struct MemoryBackupFlag(AtomicBool);

impl BackupFlagStore for MemoryBackupFlag {
    fn backup_created(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn mark_backup_created(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Persists the flag as a marker file next to the auth state.
pub struct FileBackupFlag {
    marker: PathBuf,
}

impl FileBackupFlag {
    pub fn new(dir: &Path) -> Self {
        Self {
            marker: dir.join(".auth_backup_created"),
        }
    }
}

impl BackupFlagStore for FileBackupFlag {
    fn backup_created(&self) -> bool {
        self.marker.exists()
    }

    fn mark_backup_created(&self) {
        if let Err(e) = std::fs::write(&self.marker, b"1") {
            debug!("Could not record backup marker {:?}: {}", self.marker, e);
        }
    }
}

/// Process-wide internet-access flag.
///
/// Cloning shares the flag. Reads are lock-free; every network call re-checks it
/// instead of caching an earlier answer.
#[derive(Clone, Debug)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
