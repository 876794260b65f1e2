use std::time::Duration;

use reqwest::{Client, Response};

use crate::environment::Connectivity;
use crate::error::{SyncError, SyncResult};

/// Fails fast with [`SyncError::ConnectivityDisabled`] when internet access is off.
/// Call immediately before each request; never cache the answer.
pub fn ensure_online(connectivity: &Connectivity) -> SyncResult<()> {
    if connectivity.is_online() {
        Ok(())
    } else {
        Err(SyncError::ConnectivityDisabled)
    }
}

/// Reads a response body. A body cut off mid-transfer is a transport failure, never
/// an empty answer.
pub async fn response_text(response: Response) -> SyncResult<String> {
    response
        .text()
        .await
        .map_err(|e| SyncError::Transport(format!("Failed to read response body: {}", e)))
}

/// Builds the pooled client shared by the identity provider and the backing store.
pub fn build_client(connect_timeout: Duration) -> SyncResult<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("modsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::Transport(format!("Failed to build HTTP client: {}", e)))
}
