//! Wire types for the compute gateway API.

use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub(super) struct CreateVolumeRequest {
    pub(super) name: String,
    pub(super) snapshot_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(super) tags: Vec<String>,
}

#[derive(Deserialize)]
pub(super) struct VolumeEnvelope {
    pub(super) volume: WireVolume,
}

#[derive(Deserialize)]
pub(super) struct VolumeListEnvelope {
    pub(super) volumes: Vec<WireVolume>,
}

#[derive(Deserialize)]
pub(super) struct WireVolume {
    pub(super) id: String,
    pub(super) zone: String,
    #[serde(default)]
    pub(super) state: String,
    #[serde(default)]
    pub(super) tags: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct AttachVolumeRequest {
    pub(super) volume_id: String,
    pub(super) device: String,
}

#[derive(Serialize)]
pub(super) struct DetachVolumeRequest {
    pub(super) volume_id: String,
}

#[derive(Serialize)]
pub(super) struct SubmitCommandRequest {
    pub(super) command: String,
    pub(super) working_dir: String,
}

#[derive(Deserialize)]
pub(super) struct CommandEnvelope {
    pub(super) command: WireCommand,
}

#[derive(Deserialize)]
pub(super) struct WireCommand {
    pub(super) id: String,
    #[serde(default)]
    pub(super) status: String,
    #[serde(default)]
    pub(super) stdout: String,
    #[serde(default)]
    pub(super) stderr: String,
}
