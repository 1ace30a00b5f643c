//! Narrow provider interfaces used by the export workflow.
//!
//! The orchestration core never talks to the compute gateway directly; it
//! goes through the [`VolumeApi`] and [`CommandApi`] traits so tests can
//! substitute scripted fakes and the HTTP client stays swappable.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Tag applied to every volume created by this tool, used by the janitor to
/// find leaked volumes after crashed runs.
pub const VOLUME_TAG: &str = "snapexport";

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Parameters required to create a volume from a snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRequest {
    /// Human-friendly volume name.
    pub name: String,
    /// Snapshot the volume is restored from.
    pub snapshot_id: String,
    /// Target availability zone (must match the target instance's zone).
    pub zone: String,
    /// Tags applied to the volume.
    pub tags: Vec<String>,
}

impl VolumeRequest {
    /// Creates a new volume request, trimming string fields and applying the
    /// tool tag.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        snapshot_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            snapshot_id: snapshot_id.into().trim().to_owned(),
            zone: zone.into().trim().to_owned(),
            tags: vec![String::from(VOLUME_TAG)],
        }
    }
}

/// Handle returned after creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeHandle {
    /// Provider-specific volume identifier.
    pub id: String,
    /// Zone where the volume was created.
    pub zone: String,
}

/// Lifecycle state reported by the provider for a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// The volume is being restored from its snapshot.
    Creating,
    /// The volume is ready to be attached.
    Available,
    /// The volume is attached to an instance.
    Attached,
    /// The volume is detaching from an instance.
    Detaching,
    /// The volume is being deleted.
    Deleting,
    /// The volume no longer exists.
    Deleted,
    /// The provider reported the volume as faulted.
    Error,
    /// A state this client does not recognise.
    Unknown(String),
}

impl VolumeState {
    /// Maps a provider state string onto the known state set.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "attached" | "in_use" => Self::Attached,
            "detaching" => Self::Detaching,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "error" => Self::Error,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => f.write_str("creating"),
            Self::Available => f.write_str("available"),
            Self::Attached => f.write_str("attached"),
            Self::Detaching => f.write_str("detaching"),
            Self::Deleting => f.write_str("deleting"),
            Self::Deleted => f.write_str("deleted"),
            Self::Error => f.write_str("error"),
            Self::Unknown(other) => f.write_str(other),
        }
    }
}

/// Volume listing entry returned by [`VolumeApi::list_volumes`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRecord {
    /// Provider-specific volume identifier.
    pub id: String,
    /// Zone the volume lives in.
    pub zone: String,
    /// Current lifecycle state.
    pub state: VolumeState,
    /// Tags attached to the volume.
    pub tags: Vec<String>,
}

impl VolumeRecord {
    /// Builds the handle used for mutation calls on this volume.
    #[must_use]
    pub fn handle(&self) -> VolumeHandle {
        VolumeHandle {
            id: self.id.clone(),
            zone: self.zone.clone(),
        }
    }
}

/// Identifier handed back by the remote-execution agent for a submitted
/// command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmittedCommand {
    /// Agent-assigned command identifier used for status polling.
    pub command_id: String,
}

/// Status of a remote command invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandStatus {
    /// Queued but not yet picked up by the agent.
    Pending,
    /// Currently executing on the instance.
    InProgress,
    /// Finished with a zero exit status.
    Success,
    /// Finished with a non-zero exit status.
    Failed,
    /// Killed by the agent after exceeding its execution timeout.
    TimedOut,
    /// Cancelled before completion.
    Cancelled,
}

impl CommandStatus {
    /// Maps an agent status string onto the known status set. Unrecognised
    /// values are treated as still in progress so the poll loop keeps going
    /// until its own deadline.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "timed_out" => Self::TimedOut,
            "cancelled" => Self::Cancelled,
            "pending" => Self::Pending,
            _ => Self::InProgress,
        }
    }

    /// Returns `true` when the invocation has finished and its output is
    /// captured.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::InProgress => f.write_str("in_progress"),
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
            Self::TimedOut => f.write_str("timed_out"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Snapshot of a remote command invocation as reported by the agent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Current status of the invocation.
    pub status: CommandStatus,
    /// Captured standard output; empty until the status is terminal.
    pub stdout: String,
    /// Captured standard error; empty until the status is terminal.
    pub stderr: String,
}

/// Block-storage operations required by the export workflow.
pub trait VolumeApi {
    /// Provider-specific error type returned by volume operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a volume from a snapshot and returns its handle. The volume is
    /// not necessarily available yet; callers poll [`Self::describe_volume`].
    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> ProviderFuture<'a, VolumeHandle, Self::Error>;

    /// Reports the current lifecycle state of a volume.
    fn describe_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
    ) -> ProviderFuture<'a, VolumeState, Self::Error>;

    /// Attaches a volume to an instance at the given device path.
    fn attach_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
        instance_id: &'a str,
        device: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Detaches a volume from an instance. Idempotent on the provider side.
    fn detach_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Deletes a volume. Idempotent on the provider side.
    fn delete_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Lists volumes in a zone carrying the given tag.
    fn list_volumes<'a>(
        &'a self,
        zone: &'a str,
        tag: &'a str,
    ) -> ProviderFuture<'a, Vec<VolumeRecord>, Self::Error>;
}

/// Remote-execution agent operations required by the export workflow.
pub trait CommandApi {
    /// Provider-specific error type returned by agent operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submits a shell command for execution on the instance and returns the
    /// identifier used to poll its status.
    fn submit_command<'a>(
        &'a self,
        instance_id: &'a str,
        command: &'a str,
        working_dir: &'a str,
    ) -> ProviderFuture<'a, SubmittedCommand, Self::Error>;

    /// Fetches the current invocation status and any captured output.
    fn command_invocation<'a>(
        &'a self,
        instance_id: &'a str,
        command_id: &'a str,
    ) -> ProviderFuture<'a, CommandInvocation, Self::Error>;
}
