//! Deadlines for blocking external calls.
//!
//! Model and network calls have unbounded latency, so every call the
//! pipeline waits on goes through [`with_deadline`]. HTTP clients get a
//! transport timeout a little past that deadline, so an expiring call is
//! reported as [`PilotError::Timeout`] whichever layer notices it first.

use crate::error::{PilotError, Result};
use std::future::Future;
use std::time::Duration;

/// Await `fut`, failing with [`PilotError::Timeout`] once `after` has elapsed.
pub async fn with_deadline<T, F>(after: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(PilotError::Timeout {
            what: what.to_string(),
            after,
        }),
    }
}

/// Headroom the HTTP transport gets over the deadline of the call it serves.
pub const TRANSPORT_MARGIN: Duration = Duration::from_secs(5);

/// Transport timeout for a client whose calls run under `deadline`.
pub fn transport_timeout(deadline: Duration) -> Duration {
    deadline + TRANSPORT_MARGIN
}

/// Classify a reqwest failure, turning a transport timeout into [`PilotError::Timeout`].
pub fn transport_error(err: reqwest::Error, what: &str, after: Duration) -> PilotError {
    if err.is_timeout() {
        PilotError::Timeout {
            what: what.to_string(),
            after,
        }
    } else {
        PilotError::Http(err)
    }
}
