//! Deadline-bounded polling with cancellation.
//!
//! All long waits in the orchestrator are explicit polling loops built on
//! [`poll`]: probe, sleep, repeat until the probe yields a value, the
//! deadline passes, or the run is cancelled. Sleeps always race the
//! cancellation token so a terminating process never skips its cleanup.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Why a wait ended without producing a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    /// The deadline passed before the probe yielded a value.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Poll `probe` every `interval` until it yields a value or `deadline`
/// passes. The probe runs immediately on entry; the deadline is checked
/// between probes.
pub async fn poll<T, F, Fut>(
    deadline: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        if let Some(value) = probe().await {
            return Ok(value);
        }
        if start.elapsed() >= deadline {
            return Err(PollError::TimedOut(deadline));
        }
        idle(interval, cancel).await?;
    }
}

/// Sleep for `duration`, returning early with `Cancelled` if the token
/// fires first.
pub async fn idle(duration: Duration, cancel: &CancellationToken) -> Result<(), PollError> {
    tokio::select! {
        () = cancel.cancelled() => Err(PollError::Cancelled),
        () = sleep(duration) => Ok(()),
    }
}
