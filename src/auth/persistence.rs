use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::environment::BackupFlagStore;
use crate::error::{SyncError, SyncResult};
use crate::models::AuthState;
use crate::utils::log_throttle::advisory_failure;

/// One attempt at reading the auth-state document. `None` means "not this format".
type Parser = fn(&str) -> Option<AuthState>;

/// Tried in order; the first hit wins.
const PARSERS: [(&str, Parser); 2] = [("current", parse_current), ("legacy", parse_legacy)];

fn parse_current(raw: &str) -> Option<AuthState> {
    serde_json::from_str::<AuthState>(raw).ok()
}

/// Older builds wrote the account under `uid`/`localId` and the expiry under
/// `expiration`/`expiresAt`, sometimes as epoch seconds or milliseconds.
fn parse_legacy(raw: &str) -> Option<AuthState> {
    let doc: Value = serde_json::from_str(raw).ok()?;
    let field = |names: &[&str]| names.iter().find_map(|n| doc.get(*n)).cloned();
    let text = |names: &[&str]| field(names).and_then(|v| v.as_str().map(str::to_string));

    Some(AuthState {
        id_token: text(&["idToken", "id_token"])?,
        refresh_token: text(&["refreshToken", "refresh_token"])?,
        expiration_utc: parse_instant(&field(&["expirationUtc", "expiration", "expiresAt"])?)?,
        account_id: text(&["userId", "uid", "localId"])?,
    })
}

/// Accepts RFC 3339 text or a Unix timestamp in seconds or milliseconds.
fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<i64>().ok().and_then(from_epoch)),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    // Anything past year 5138 in seconds is a millisecond timestamp.
    if n > 100_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

/// The on-disk mirror of the authenticator's state.
pub struct AuthStateFile {
    path: PathBuf,
    backup_flag: Arc<dyn BackupFlagStore>,
}

impl AuthStateFile {
    pub fn new(path: PathBuf, backup_flag: Arc<dyn BackupFlagStore>) -> Self {
        Self { path, backup_flag }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Reads the persisted state. Missing, unreadable, malformed or incomplete files all
    /// yield `None`.
    pub async fn load(&self) -> Option<AuthState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read auth state {:?}: {}", self.path, e);
                return None;
            }
        };

        let Some((format, state)) = PARSERS
            .iter()
            .find_map(|(name, parse)| parse(&raw).map(|s| (*name, s)))
        else {
            warn!("Ignoring unrecognised auth state file {:?}", self.path);
            return None;
        };
        if !state.is_complete() {
            debug!("Auth state file {:?} is incomplete; treating as absent", self.path);
            return None;
        }

        if format != "current" {
            info!(
                event_name = "auth.migrate",
                event_domain = "auth",
                "Migrating {} auth state file to the current format",
                format
            );
            if let Err(e) = self.save(&state).await {
                advisory_failure("auth.migrate", &e);
            }
        }
        Some(state)
    }

    /// Writes the state via a temp file and rename so readers never see a partial file.
    pub async fn save(&self, state: &AuthState) -> SyncResult<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SyncError::Persistence(format!("{}: {}", dir.display(), e)))?;
        }
        let body = serde_json::to_vec_pretty(state)?;
        let tmp = self.sibling(".tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| SyncError::Persistence(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::Persistence(format!("{}: {}", self.path.display(), e)))
    }

    /// Removes the file; a missing file is already cleared.
    pub async fn clear(&self) -> SyncResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Persistence(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Copies the file to `<name>.bak` the first time a state is saved. Never fails.
    pub async fn backup_once(&self) {
        if self.backup_flag.backup_created() {
            return;
        }
        let backup = self.sibling(".bak");
        match tokio::fs::copy(&self.path, &backup).await {
            Ok(_) => {
                debug!("Backed up auth state to {:?}", backup);
                self.backup_flag.mark_backup_created();
            }
            Err(e) => advisory_failure("auth.backup", &e),
        }
    }
}
