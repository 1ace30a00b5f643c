//! Shared poll-loop sleep helper.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Outcome of one poll-loop sleep.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PollWait {
    /// The interval elapsed; the loop should poll again.
    Continue,
    /// Cancellation was requested while sleeping.
    Cancelled,
}

/// Sleeps for one poll interval unless cancellation arrives first.
pub(crate) async fn sleep_or_cancelled(interval: Duration, cancel: &CancellationToken) -> PollWait {
    tokio::select! {
        () = cancel.cancelled() => PollWait::Cancelled,
        () = sleep(interval) => PollWait::Continue,
    }
}
