//! Async timeout helpers shared by the session read path and broadcast sends.

use crate::error::{RelayError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default bound on a single broadcast send
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for sessions to drain
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` with a deadline, mapping expiry to `RelayError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout),
    }
}

/// Like [`with_timeout_error`] but the deadline is optional; `None` waits forever.
///
/// Expiry maps to `RelayError::ConnectionTimeout`, since this guards idle reads.
pub async fn maybe_with_idle_timeout<F, T>(fut: F, duration: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::ConnectionTimeout),
        },
        None => fut.await,
    }
}
