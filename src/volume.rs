//! Volume lifecycle management over the provider's volume API.
//!
//! Creation and the availability wait are split so a job still holds the
//! volume's handle when the wait fails and can delete it during cleanup
//! instead of leaking a billable volume.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::{VolumeApi, VolumeHandle, VolumeRequest, VolumeState};
use crate::wait::{PollWait, sleep_or_cancelled};

/// Errors surfaced by volume lifecycle operations.
#[derive(Debug, Error)]
pub enum VolumeError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the provider rejects the create call.
    #[error("failed to create volume from snapshot {snapshot_id}: {source}")]
    Create {
        /// Snapshot the volume was to be restored from.
        snapshot_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when the provider rejects a status query.
    #[error("failed to query state of volume {volume_id}: {source}")]
    Describe {
        /// Volume being queried.
        volume_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when a volume does not become available before the deadline.
    #[error("timeout waiting for volume {volume_id} to become available after {waited_secs}s")]
    Timeout {
        /// Volume being waited on.
        volume_id: String,
        /// Configured wait bound in seconds.
        waited_secs: u64,
    },
    /// Raised when the provider reports a state the volume cannot recover
    /// from while waiting for availability.
    #[error("volume {volume_id} entered state {state} while waiting for availability")]
    UnexpectedState {
        /// Volume being waited on.
        volume_id: String,
        /// State reported by the provider.
        state: VolumeState,
    },
    /// Raised when cancellation interrupts the availability wait.
    #[error("wait for volume {volume_id} cancelled")]
    Cancelled {
        /// Volume being waited on.
        volume_id: String,
    },
    /// Raised when the provider rejects the attach call.
    #[error("failed to attach volume {volume_id} to instance {instance_id} at {device}: {source}")]
    Attach {
        /// Volume being attached.
        volume_id: String,
        /// Target instance.
        instance_id: String,
        /// Device path requested for the attachment.
        device: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when the provider rejects the detach call.
    #[error("failed to detach volume {volume_id} from instance {instance_id}: {source}")]
    Detach {
        /// Volume being detached.
        volume_id: String,
        /// Instance the volume was attached to.
        instance_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when the provider rejects the delete call.
    #[error("failed to delete volume {volume_id}: {source}")]
    Delete {
        /// Volume being deleted.
        volume_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
}

/// Drives a volume through create, availability wait, attach, detach, and
/// delete against a [`VolumeApi`] implementation.
#[derive(Clone, Debug)]
pub struct VolumeLifecycle<A> {
    api: A,
    poll_interval: Duration,
    wait_timeout: Duration,
    cancel: CancellationToken,
}

impl<A: VolumeApi> VolumeLifecycle<A> {
    /// Creates a lifecycle manager using the given poll cadence and deadline.
    #[must_use]
    pub const fn new(
        api: A,
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

    /// Issues the provider create call and returns the new volume's handle.
    /// The volume is usually still `creating`; follow with
    /// [`Self::wait_until_available`].
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Create`] when the provider rejects the call.
    pub async fn create(
        &self,
        request: &VolumeRequest,
    ) -> Result<VolumeHandle, VolumeError<A::Error>> {
        let handle = self
            .api
            .create_volume(request)
            .await
            .map_err(|source| VolumeError::Create {
                snapshot_id: request.snapshot_id.clone(),
                source,
            })?;
        debug!(volume_id = %handle.id, snapshot_id = %request.snapshot_id, "volume created");
        Ok(handle)
    }

    /// Polls the volume's state until it reports `available`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Describe`] when a status query fails,
    /// [`VolumeError::UnexpectedState`] when the volume reaches a state it
    /// cannot become available from, [`VolumeError::Timeout`] when the
    /// deadline passes, and [`VolumeError::Cancelled`] on cancellation.
    pub async fn wait_until_available(
        &self,
        handle: &VolumeHandle,
    ) -> Result<(), VolumeError<A::Error>> {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            let state = self
                .api
                .describe_volume(handle)
                .await
                .map_err(|source| VolumeError::Describe {
                    volume_id: handle.id.clone(),
                    source,
                })?;

            match state {
                VolumeState::Available => return Ok(()),
                VolumeState::Error | VolumeState::Deleting | VolumeState::Deleted => {
                    return Err(VolumeError::UnexpectedState {
                        volume_id: handle.id.clone(),
                        state,
                    });
                }
                _ => {}
            }

            if sleep_or_cancelled(self.poll_interval, &self.cancel).await == PollWait::Cancelled {
                return Err(VolumeError::Cancelled {
                    volume_id: handle.id.clone(),
                });
            }
        }

        Err(VolumeError::Timeout {
            volume_id: handle.id.clone(),
            waited_secs: self.wait_timeout.as_secs(),
        })
    }

    /// Attaches the volume to an instance at the given device path. The
    /// provider call itself resolves the attachment; no poll loop follows.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Attach`] when the provider rejects the call.
    pub async fn attach(
        &self,
        handle: &VolumeHandle,
        instance_id: &str,
        device: &str,
    ) -> Result<(), VolumeError<A::Error>> {
        self.api
            .attach_volume(handle, instance_id, device)
            .await
            .map_err(|source| VolumeError::Attach {
                volume_id: handle.id.clone(),
                instance_id: instance_id.to_owned(),
                device: device.to_owned(),
                source,
            })
    }

    /// Detaches the volume from an instance.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Detach`] when the provider rejects the call.
    pub async fn detach(
        &self,
        handle: &VolumeHandle,
        instance_id: &str,
    ) -> Result<(), VolumeError<A::Error>> {
        self.api
            .detach_volume(handle, instance_id)
            .await
            .map_err(|source| VolumeError::Detach {
                volume_id: handle.id.clone(),
                instance_id: instance_id.to_owned(),
                source,
            })
    }

    /// Deletes the volume.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Delete`] when the provider rejects the call.
    pub async fn delete(&self, handle: &VolumeHandle) -> Result<(), VolumeError<A::Error>> {
        self.api
            .delete_volume(handle)
            .await
            .map_err(|source| VolumeError::Delete {
                volume_id: handle.id.clone(),
                source,
            })
    }
}
