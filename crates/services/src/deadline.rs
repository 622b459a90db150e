use std::future::Future;
use std::time::Duration;

use storage::repository::StorageError;

use crate::error::ServiceError;

/// Default per-call deadline for gateway requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one gateway call under `limit`.
///
/// # Errors
///
/// Returns `ServiceError::Timeout` when the call does not finish in time,
/// otherwise the call's own error.
pub async fn within<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, ServiceError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => {
            tracing::warn!(?limit, "gateway call exceeded deadline");
            Err(ServiceError::Timeout(limit))
        }
    }
}
