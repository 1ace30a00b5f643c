//! Remote shell command construction for the export workflow.
//!
//! Export jobs drive the instance exclusively through shell one-liners
//! submitted to the execution agent. This module centralises the
//! string-building so the job module stays focused on orchestration, and
//! every interpolated fragment is shell-escaped.

use shell_escape::unix::escape;
use time::OffsetDateTime;
use time::macros::format_description;

/// Builds the command that creates the mount point and mounts the attached
/// device onto it.
#[must_use]
pub fn mount_command(device: &str, mount_target: &str) -> String {
    let escaped_device = escape(device.into());
    let escaped_target = escape(mount_target.into());
    format!("sudo mkdir -p {escaped_target} && sudo mount {escaped_device} {escaped_target}")
}

/// Builds the command used to verify that the device is mounted. Exits
/// non-zero (agent status `failed`) until the mount is visible.
#[must_use]
pub fn mount_check_command(mount_target: &str) -> String {
    let escaped_target = escape(mount_target.into());
    format!("mountpoint -q {escaped_target}")
}

/// Builds the object-storage key prefix shared by all files exported from
/// one volume: `{application_name}/{volume_id}-{timestamp}/`.
#[must_use]
pub fn object_prefix(application_name: &str, volume_id: &str, timestamp: &str) -> String {
    format!("{application_name}/{volume_id}-{timestamp}/")
}

/// Builds the export command: copies files whose names match
/// `{name_prefix}-*` from the remote working directory into the bucket under
/// the given key prefix.
#[must_use]
pub fn export_command(bucket: &str, destination_prefix: &str, name_prefix: &str) -> String {
    let destination = escape(format!("s3://{bucket}/{destination_prefix}").into());
    let include = escape(format!("{name_prefix}-*").into());
    format!("aws s3 cp . {destination} --recursive --exclude '*' --include {include}")
}

/// Formats the timestamp shared by every job in one batch
/// (`YYYY-MM-DDTHH.MM.SS`, UTC). Falls back to the epoch-second count if the
/// formatter fails.
#[must_use]
pub fn batch_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    let format = format_description!("[year]-[month]-[day]T[hour].[minute].[second]");
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
