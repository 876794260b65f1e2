//! Command-line surface of the `modsync` binary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};
use crate::models::Slot;
use crate::state::SyncEngine;

#[derive(Parser, Debug)]
#[command(name = "modsync")]
#[command(about = "Cloud sync for modlist slots")]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "PATH", env = "MODSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    pub schema: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the anonymous account in use, signing in if needed
    Session {
        /// Only report a stored session; never create a new account
        #[arg(long)]
        existing: bool,
    },
    /// List occupied slots
    List,
    /// Print the modlist stored in a slot
    Load { slot: String },
    /// Upload a modlist JSON file into a slot
    Save { slot: String, file: PathBuf },
    /// Empty a slot
    Delete { slot: String },
    /// Delete every slot and release the identity
    Wipe,
    /// Delete the anonymous account and its local credentials
    DeleteAccount,
}

async fn read_content(file: &Path) -> SyncResult<Value> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| SyncError::InvalidContent(format!("{}: {}", file.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| SyncError::InvalidContent(format!("{}: {}", file.display(), e)))
}

/// Runs one command and returns the text to print.
pub async fn execute(
    engine: &SyncEngine,
    command: Command,
    cancel: &CancellationToken,
) -> SyncResult<String> {
    match command {
        Command::Session { existing: false } => {
            let session = engine.authenticator.get_session(cancel).await?;
            Ok(format!("Signed in as {}", session.account_id))
        }
        Command::Session { existing: true } => {
            match engine.authenticator.try_get_existing_session(cancel).await? {
                Some(session) => Ok(format!("Signed in as {}", session.account_id)),
                None => Ok("No stored session".to_string()),
            }
        }
        Command::List => {
            let player = engine.player()?;
            let slots = engine.modlists.list_slots(&player, cancel).await?;
            Ok(slots
                .iter()
                .map(Slot::to_string)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Load { slot } => {
            let slot: Slot = slot.parse()?;
            let player = engine.player()?;
            match engine.modlists.load(&player, slot, cancel).await? {
                Some(content) => Ok(serde_json::to_string_pretty(&content)?),
                None => Ok(format!("{} is empty", slot)),
            }
        }
        Command::Save { slot, file } => {
            let slot: Slot = slot.parse()?;
            let player = engine.player()?;
            let content = read_content(&file).await?;
            let node = engine.modlists.save(&player, slot, &content, cancel).await?;
            engine.modlists.flush_advisory().await;
            Ok(format!(
                "Saved {} (registry id {})",
                slot,
                node.registry_id.unwrap_or_default()
            ))
        }
        Command::Delete { slot } => {
            let slot: Slot = slot.parse()?;
            let player = engine.player()?;
            engine.modlists.delete(&player, slot, cancel).await?;
            Ok(format!("Deleted {}", slot))
        }
        Command::Wipe => {
            let player = engine.player()?;
            engine.modlists.delete_all_user_data(&player, cancel).await?;
            Ok(format!("Deleted all data for {}", player.display_name))
        }
        Command::DeleteAccount => {
            engine.authenticator.delete_account(cancel).await?;
            Ok("Account deleted".to_string())
        }
    }
}
