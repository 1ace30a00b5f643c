//! Core library for the snapexport bulk snapshot-export tool.
//!
//! The crate restores block-storage snapshots as volumes on a running
//! instance, mounts each one, exports selected application files to object
//! storage through the instance's remote-execution agent, and tears the
//! volume down again — concurrently for every snapshot in an input list.
//! Provider access goes through the narrow [`provider::VolumeApi`] and
//! [`provider::CommandApi`] traits, implemented for the compute gateway in
//! [`gateway`].

pub mod config;
pub mod device;
pub mod export;
pub mod gateway;
pub mod janitor;
pub mod manifest;
pub mod provider;
pub mod remote;
pub mod script;
pub mod volume;
mod wait;

pub use config::{ConfigError, ExportConfig};
pub use device::{DeviceAllocator, DeviceSlot};
pub use export::{
    BatchSummary, CleanupFailure, ExportOrchestrator, ExportOutcome, ExportPlan, JobFailure,
    JobReport,
};
pub use gateway::{GatewayApiError, GatewayClient};
pub use janitor::{Janitor, JanitorError, SweepSummary};
pub use manifest::{ManifestError, load_snapshot_manifest};
pub use provider::{
    CommandApi, CommandInvocation, CommandStatus, ProviderFuture, SubmittedCommand, VOLUME_TAG,
    VolumeApi, VolumeHandle, VolumeRecord, VolumeRequest, VolumeState,
};
pub use remote::{RemoteCommandOutput, RemoteError, RemoteExecutor};
pub use volume::{VolumeError, VolumeLifecycle};
