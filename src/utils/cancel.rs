use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};

/// Runs `fut` unless `cancel` fires first, in which case the future is dropped
/// and [`SyncError::Cancelled`] is returned.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        res = fut => res,
    }
}
