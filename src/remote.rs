//! Remote command execution through the instance's execution agent.
//!
//! The agent exposes submit and status-poll calls only; there is no push
//! notification for completion. The executor polls until the invocation
//! reaches one of the four terminal statuses and returns the captured
//! output together with that status. Interpreting the status is the
//! caller's business.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::{CommandApi, CommandStatus};
use crate::wait::{PollWait, sleep_or_cancelled};

/// Output captured from a remote command once it reached a terminal status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Terminal status reported by the agent.
    pub status: CommandStatus,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the agent reported the command as successful.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, CommandStatus::Success)
    }
}

/// Errors surfaced while executing a remote command.
#[derive(Debug, Error)]
pub enum RemoteError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the agent rejects the command submission.
    #[error("failed to submit command to instance {instance_id}: {source}")]
    Submit {
        /// Instance the command was submitted to.
        instance_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when an invocation status query fails.
    #[error("failed to query status of command {command_id}: {source}")]
    Status {
        /// Agent-assigned command identifier.
        command_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when the invocation does not reach a terminal status before
    /// the deadline.
    #[error("timeout waiting for command {command_id} to finish after {waited_secs}s")]
    Timeout {
        /// Agent-assigned command identifier.
        command_id: String,
        /// Configured wait bound in seconds.
        waited_secs: u64,
    },
    /// Raised when cancellation interrupts the status wait.
    #[error("wait for command {command_id} cancelled")]
    Cancelled {
        /// Agent-assigned command identifier.
        command_id: String,
    },
}

/// Submits remote commands and waits for their terminal status.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<C> {
    api: C,
    poll_interval: Duration,
    wait_timeout: Duration,
    cancel: CancellationToken,
}

impl<C: CommandApi> RemoteExecutor<C> {
    /// Creates an executor using the given poll cadence and deadline.
    #[must_use]
    pub const fn new(
        api: C,
        poll_interval: Duration,
        wait_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            poll_interval,
            wait_timeout,
            cancel,
        }
    }

    /// Runs a command on the instance and waits for it to finish.
    ///
    /// The returned output carries whichever terminal status the agent
    /// reported, including `failed`, `timed_out`, and `cancelled`; a
    /// non-success status is not an error at this layer.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Submit`] or [`RemoteError::Status`] when a
    /// provider call fails, [`RemoteError::Timeout`] when the deadline
    /// passes without a terminal status, and [`RemoteError::Cancelled`] on
    /// cancellation.
    pub async fn run(
        &self,
        instance_id: &str,
        command: &str,
        working_dir: &str,
    ) -> Result<RemoteCommandOutput, RemoteError<C::Error>> {
        let submitted = self
            .api
            .submit_command(instance_id, command, working_dir)
            .await
            .map_err(|source| RemoteError::Submit {
                instance_id: instance_id.to_owned(),
                source,
            })?;
        debug!(command_id = %submitted.command_id, instance_id = %instance_id, "command submitted");

        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            let invocation = self
                .api
                .command_invocation(instance_id, &submitted.command_id)
                .await
                .map_err(|source| RemoteError::Status {
                    command_id: submitted.command_id.clone(),
                    source,
                })?;

            if invocation.status.is_terminal() {
                return Ok(RemoteCommandOutput {
                    status: invocation.status,
                    stdout: invocation.stdout,
                    stderr: invocation.stderr,
                });
            }

            if sleep_or_cancelled(self.poll_interval, &self.cancel).await == PollWait::Cancelled {
                return Err(RemoteError::Cancelled {
                    command_id: submitted.command_id.clone(),
                });
            }
        }

        Err(RemoteError::Timeout {
            command_id: submitted.command_id,
            waited_secs: self.wait_timeout.as_secs(),
        })
    }
}
