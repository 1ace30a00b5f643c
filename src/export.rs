//! Per-snapshot export jobs and the concurrent batch orchestrator.
//!
//! Each job restores one snapshot as a volume, attaches it at a device slot,
//! mounts it, exports the application's files to object storage through the
//! remote-execution agent, and tears the volume down again. Cleanup of held
//! resources runs on every exit path; a failed job never aborts its
//! siblings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::device::{DeviceAllocator, DeviceSlot};
use crate::provider::{CommandApi, CommandStatus, VolumeApi, VolumeHandle, VolumeRequest};
use crate::remote::{RemoteError, RemoteExecutor};
use crate::script::{
    batch_timestamp, export_command, mount_check_command, mount_command, object_prefix,
};
use crate::volume::{VolumeError, VolumeLifecycle};
use crate::wait::{PollWait, sleep_or_cancelled};

/// Everything a batch needs to know about its target instance and
/// destination, resolved from configuration before the run starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportPlan {
    /// Instance the volumes are attached to and commands run on.
    pub instance_id: String,
    /// Zone volumes are created in; must match the instance's zone.
    pub availability_zone: String,
    /// Object-storage bucket receiving the exported files.
    pub bucket: String,
    /// Application name, used as the leading object-key segment.
    pub application_name: String,
    /// File-name prefix selecting which files are exported.
    pub application_prefix: String,
    /// Fixed pool of mount points jobs cycle over.
    pub mount_points: Vec<String>,
    /// Interval between provider status polls.
    pub poll_interval: Duration,
    /// Deadline applied to each polling stage.
    pub stage_timeout: Duration,
    /// Cap on concurrently running jobs; `None` runs every job at once.
    pub max_concurrent_jobs: Option<usize>,
}

impl ExportPlan {
    /// Returns the mount target assigned to the job with the given sequence
    /// index. Jobs cycle over the pool, so indices beyond the pool size
    /// share targets.
    #[must_use]
    pub fn mount_target_for(&self, index: usize) -> String {
        self.mount_points
            .iter()
            .cycle()
            .nth(index)
            .cloned()
            .unwrap_or_else(|| String::from("/mnt/data1"))
    }
}

/// Terminal failure of one export job, reported with its snapshot.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobFailure {
    /// The provider rejected the volume create call.
    #[error("failed to create volume from snapshot {snapshot_id}: {message}")]
    CreateVolume {
        /// Snapshot the job was processing.
        snapshot_id: String,
        /// Underlying error message.
        message: String,
    },
    /// The volume never became available (provider failure, bad state, or
    /// deadline).
    #[error("volume {volume_id} did not become available: {message}")]
    VolumeWait {
        /// Volume created for the job.
        volume_id: String,
        /// Underlying error message.
        message: String,
    },
    /// Every device slot on the instance was taken.
    #[error("no device slot available to attach volume {volume_id}")]
    DeviceSlotsExhausted {
        /// Volume created for the job; deleted before this is reported.
        volume_id: String,
    },
    /// The provider rejected the attach call.
    #[error("failed to attach volume {volume_id}: {message}")]
    Attach {
        /// Volume created for the job.
        volume_id: String,
        /// Underlying error message.
        message: String,
    },
    /// Running a mount-stage command through the agent failed.
    #[error("mount stage failed for {mount_target}: {message}")]
    Mount {
        /// Mount target assigned to the job.
        mount_target: String,
        /// Underlying error message.
        message: String,
    },
    /// The mount command reached a terminal status other than success.
    #[error("mount command on {mount_target} finished with status {status}: {stderr}")]
    MountCommandFailed {
        /// Mount target assigned to the job.
        mount_target: String,
        /// Terminal status reported by the agent.
        status: CommandStatus,
        /// Stderr captured from the mount command.
        stderr: String,
    },
    /// The device never showed up as mounted before the stage deadline.
    #[error("device {device} not mounted at {mount_target} within {waited_secs}s")]
    MountVerifyTimeout {
        /// Device path the volume was attached at.
        device: String,
        /// Mount target assigned to the job.
        mount_target: String,
        /// Configured wait bound in seconds.
        waited_secs: u64,
    },
    /// Running the export command through the agent failed.
    #[error("export failed for volume {volume_id}: {message}")]
    Export {
        /// Volume the export was reading from.
        volume_id: String,
        /// Underlying error message.
        message: String,
    },
    /// The export command reached a terminal status other than success.
    #[error("export command for volume {volume_id} finished with status {status}: {stderr}")]
    ExportCommandFailed {
        /// Volume the export was reading from.
        volume_id: String,
        /// Terminal status reported by the agent.
        status: CommandStatus,
        /// Stderr captured from the export command.
        stderr: String,
    },
    /// The job was cancelled before it completed.
    #[error("job cancelled before completion")]
    Cancelled,
    /// The job's task failed outside the workflow itself.
    #[error("job task failed: {message}")]
    Internal {
        /// Description of the task failure.
        message: String,
    },
}

/// A cleanup step that failed after the job's main outcome was decided.
/// Reported alongside the outcome; never overrides an export success.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CleanupFailure {
    /// Cleanup step that failed (`detach` or `delete`).
    pub action: &'static str,
    /// Volume the step was acting on.
    pub volume_id: String,
    /// Underlying error message.
    pub message: String,
}

/// Successful result of one export job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportOutcome {
    /// Volume the files were exported from.
    pub volume_id: String,
    /// Object-storage key prefix the files were copied under.
    pub object_prefix: String,
    /// Stdout captured from the export command.
    pub stdout: String,
}

/// Terminal report for one export job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobReport {
    /// Snapshot the job processed.
    pub snapshot_id: String,
    /// Volume created for the job, when creation got that far.
    pub volume_id: Option<String>,
    /// Outcome of the workflow.
    pub result: Result<ExportOutcome, JobFailure>,
    /// Cleanup steps that failed after the outcome was decided.
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl JobReport {
    /// Returns `true` when the export itself succeeded, regardless of
    /// cleanup failures.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    fn failed(snapshot_id: &str, volume_id: Option<String>, failure: JobFailure) -> Self {
        Self {
            snapshot_id: snapshot_id.to_owned(),
            volume_id,
            result: Err(failure),
            cleanup_failures: Vec::new(),
        }
    }
}

/// Outcome of a whole batch run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchSummary {
    /// One report per snapshot, in input order.
    pub reports: Vec<JobReport>,
}

impl BatchSummary {
    /// Number of jobs whose export succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|report| report.is_success()).count()
    }

    /// Number of jobs that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    /// Total number of cleanup failures across all jobs.
    #[must_use]
    pub fn cleanup_failures(&self) -> usize {
        self.reports
            .iter()
            .map(|report| report.cleanup_failures.len())
            .sum()
    }
}

/// Resources a job holds beyond its volume, tracked for cleanup.
#[derive(Debug, Default)]
struct HeldResources {
    slot: Option<DeviceSlot>,
    attached: bool,
}

/// Runs one export job per snapshot, all concurrently, and waits for every
/// job to reach a terminal outcome.
#[derive(Clone, Debug)]
pub struct ExportOrchestrator<V, C> {
    volumes: VolumeLifecycle<V>,
    remote: RemoteExecutor<C>,
    devices: DeviceAllocator,
    plan: Arc<ExportPlan>,
    cancel: CancellationToken,
}

impl<V, C> ExportOrchestrator<V, C>
where
    V: VolumeApi + Clone + Send + Sync + 'static,
    C: CommandApi + Clone + Send + Sync + 'static,
{
    /// Creates an orchestrator over the given provider clients, allocator,
    /// and plan. The cancellation token is shared with every poll loop.
    #[must_use]
    pub fn new(
        volume_api: V,
        command_api: C,
        devices: DeviceAllocator,
        plan: ExportPlan,
        cancel: CancellationToken,
    ) -> Self {
        let volumes = VolumeLifecycle::new(
            volume_api,
            plan.poll_interval,
            plan.stage_timeout,
            cancel.clone(),
        );
        let remote = RemoteExecutor::new(
            command_api,
            plan.poll_interval,
            plan.stage_timeout,
            cancel.clone(),
        );
        Self {
            volumes,
            remote,
            devices,
            plan: Arc::new(plan),
            cancel,
        }
    }

    /// Runs the whole batch and returns one report per snapshot.
    ///
    /// Jobs are spawned concurrently, gated by the plan's concurrency limit.
    /// A failed or panicked job becomes a failed report; siblings keep
    /// running. No job is retried.
    pub async fn run(&self, snapshot_ids: Vec<String>) -> BatchSummary {
        let timestamp = batch_timestamp();
        if snapshot_ids.len() > self.plan.mount_points.len() {
            warn!(
                jobs = snapshot_ids.len(),
                mount_points = self.plan.mount_points.len(),
                "more jobs than mount points; jobs will share mount targets"
            );
        }

        let permits = self
            .plan
            .max_concurrent_jobs
            .unwrap_or_else(|| snapshot_ids.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut handles = Vec::with_capacity(snapshot_ids.len());
        for (index, snapshot_id) in snapshot_ids.into_iter().enumerate() {
            let job = self.clone();
            let gate = Arc::clone(&semaphore);
            let stamp = timestamp.clone();
            let task_snapshot = snapshot_id.clone();
            let handle = tokio::spawn(async move {
                match gate.acquire_owned().await {
                    Ok(_permit) => job.process_snapshot(index, &task_snapshot, &stamp).await,
                    Err(_closed) => JobReport::failed(&task_snapshot, None, JobFailure::Cancelled),
                }
            });
            handles.push((snapshot_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (snapshot_id, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(join_error) => reports.push(JobReport::failed(
                    &snapshot_id,
                    None,
                    JobFailure::Internal {
                        message: join_error.to_string(),
                    },
                )),
            }
        }

        BatchSummary { reports }
    }

    /// Runs the full restore-mount-export-cleanup workflow for one snapshot.
    /// Never propagates an error: every failure is caught at this boundary
    /// and turned into a report.
    async fn process_snapshot(&self, index: usize, snapshot_id: &str, timestamp: &str) -> JobReport {
        if self.cancel.is_cancelled() {
            return JobReport::failed(snapshot_id, None, JobFailure::Cancelled);
        }

        info!(snapshot_id = %snapshot_id, index, "starting export job");
        let request = VolumeRequest::new(
            format!("snapexport-{}", Uuid::new_v4().simple()),
            snapshot_id,
            &self.plan.availability_zone,
        );
        let volume = match self.volumes.create(&request).await {
            Ok(handle) => handle,
            Err(err) => {
                error!(snapshot_id = %snapshot_id, error = %err, "export job failed");
                return JobReport::failed(
                    snapshot_id,
                    None,
                    JobFailure::CreateVolume {
                        snapshot_id: snapshot_id.to_owned(),
                        message: err.to_string(),
                    },
                );
            }
        };

        let mut held = HeldResources::default();
        let result = self
            .restore_and_export(index, &volume, timestamp, &mut held)
            .await;
        let cleanup_failures = self.cleanup(&volume, held).await;

        match &result {
            Ok(outcome) => {
                info!(
                    snapshot_id = %snapshot_id,
                    volume_id = %outcome.volume_id,
                    object_prefix = %outcome.object_prefix,
                    "export job finished"
                );
            }
            Err(failure) => {
                error!(snapshot_id = %snapshot_id, error = %failure, "export job failed");
            }
        }

        JobReport {
            snapshot_id: snapshot_id.to_owned(),
            volume_id: Some(volume.id),
            result,
            cleanup_failures,
        }
    }

    /// Steps between volume creation and cleanup. Held resources are
    /// recorded in `held` as they are acquired so cleanup can undo exactly
    /// what this function got through.
    async fn restore_and_export(
        &self,
        index: usize,
        volume: &VolumeHandle,
        timestamp: &str,
        held: &mut HeldResources,
    ) -> Result<ExportOutcome, JobFailure> {
        self.volumes
            .wait_until_available(volume)
            .await
            .map_err(|err| Self::volume_wait_failure(&volume.id, &err))?;

        let Some(slot) = self.devices.acquire() else {
            return Err(JobFailure::DeviceSlotsExhausted {
                volume_id: volume.id.clone(),
            });
        };
        held.slot = Some(slot);

        let device = slot.path();
        self.volumes
            .attach(volume, &self.plan.instance_id, &device)
            .await
            .map_err(|err| Self::attach_failure(&volume.id, &err))?;
        held.attached = true;

        let mount_target = self.plan.mount_target_for(index);
        self.mount(&device, &mount_target).await?;
        self.export(volume, &mount_target, timestamp).await
    }

    /// Mounts the device and verifies the mount is visible before returning.
    async fn mount(&self, device: &str, mount_target: &str) -> Result<(), JobFailure> {
        let output = self
            .remote
            .run(
                &self.plan.instance_id,
                &mount_command(device, mount_target),
                "/",
            )
            .await
            .map_err(|err| Self::mount_failure(mount_target, &err))?;

        if !output.is_success() {
            return Err(JobFailure::MountCommandFailed {
                mount_target: mount_target.to_owned(),
                status: output.status,
                stderr: output.stderr,
            });
        }

        self.wait_for_mount(device, mount_target).await
    }

    /// Polls `mountpoint -q` until the mount is visible. The mount command
    /// has no completion signal of its own beyond terminal status, so this
    /// check is what gates the export.
    async fn wait_for_mount(&self, device: &str, mount_target: &str) -> Result<(), JobFailure> {
        let check = mount_check_command(mount_target);
        let deadline = Instant::now() + self.plan.stage_timeout;
        while Instant::now() <= deadline {
            let output = self
                .remote
                .run(&self.plan.instance_id, &check, "/")
                .await
                .map_err(|err| Self::mount_failure(mount_target, &err))?;
            if output.is_success() {
                return Ok(());
            }

            if sleep_or_cancelled(self.plan.poll_interval, &self.cancel).await
                == PollWait::Cancelled
            {
                return Err(JobFailure::Cancelled);
            }
        }

        Err(JobFailure::MountVerifyTimeout {
            device: device.to_owned(),
            mount_target: mount_target.to_owned(),
            waited_secs: self.plan.stage_timeout.as_secs(),
        })
    }

    /// Runs the export command from the mount target and inspects its
    /// terminal status.
    async fn export(
        &self,
        volume: &VolumeHandle,
        mount_target: &str,
        timestamp: &str,
    ) -> Result<ExportOutcome, JobFailure> {
        let destination = object_prefix(&self.plan.application_name, &volume.id, timestamp);
        let command = export_command(
            &self.plan.bucket,
            &destination,
            &self.plan.application_prefix,
        );
        let output = self
            .remote
            .run(&self.plan.instance_id, &command, mount_target)
            .await
            .map_err(|err| Self::export_failure(&volume.id, &err))?;

        if !output.is_success() {
            return Err(JobFailure::ExportCommandFailed {
                volume_id: volume.id.clone(),
                status: output.status,
                stderr: output.stderr,
            });
        }

        Ok(ExportOutcome {
            volume_id: volume.id.clone(),
            object_prefix: destination,
            stdout: output.stdout,
        })
    }

    /// Best-effort teardown of whatever the job acquired: detach when
    /// attached, delete the volume, release the device slot. Failures are
    /// reported, never escalated.
    async fn cleanup(&self, volume: &VolumeHandle, held: HeldResources) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();

        if held.attached {
            if let Err(err) = self.volumes.detach(volume, &self.plan.instance_id).await {
                warn!(volume_id = %volume.id, error = %err, "cleanup: detach failed");
                failures.push(CleanupFailure {
                    action: "detach",
                    volume_id: volume.id.clone(),
                    message: err.to_string(),
                });
            }
        }

        if let Err(err) = self.volumes.delete(volume).await {
            warn!(volume_id = %volume.id, error = %err, "cleanup: delete failed");
            failures.push(CleanupFailure {
                action: "delete",
                volume_id: volume.id.clone(),
                message: err.to_string(),
            });
        }

        if let Some(slot) = held.slot {
            self.devices.release(slot);
        }

        failures
    }

    fn volume_wait_failure(volume_id: &str, err: &VolumeError<V::Error>) -> JobFailure {
        if matches!(err, VolumeError::Cancelled { .. }) {
            return JobFailure::Cancelled;
        }
        JobFailure::VolumeWait {
            volume_id: volume_id.to_owned(),
            message: err.to_string(),
        }
    }

    fn attach_failure(volume_id: &str, err: &VolumeError<V::Error>) -> JobFailure {
        JobFailure::Attach {
            volume_id: volume_id.to_owned(),
            message: err.to_string(),
        }
    }

    fn mount_failure(mount_target: &str, err: &RemoteError<C::Error>) -> JobFailure {
        if matches!(err, RemoteError::Cancelled { .. }) {
            return JobFailure::Cancelled;
        }
        JobFailure::Mount {
            mount_target: mount_target.to_owned(),
            message: err.to_string(),
        }
    }

    fn export_failure(volume_id: &str, err: &RemoteError<C::Error>) -> JobFailure {
        if matches!(err, RemoteError::Cancelled { .. }) {
            return JobFailure::Cancelled;
        }
        JobFailure::Export {
            volume_id: volume_id.to_owned(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_mounts(mount_points: Vec<String>) -> ExportPlan {
        ExportPlan {
            instance_id: String::from("i-1"),
            availability_zone: String::from("zone-a"),
            bucket: String::from("backups"),
            application_name: String::from("ledger"),
            application_prefix: String::from("ledger"),
            mount_points,
            poll_interval: Duration::from_millis(1),
            stage_timeout: Duration::from_millis(50),
            max_concurrent_jobs: None,
        }
    }

    #[test]
    fn mount_targets_cycle_over_the_pool() {
        let plan = plan_with_mounts(vec![
            String::from("/mnt/data1"),
            String::from("/mnt/data2"),
        ]);
        assert_eq!(plan.mount_target_for(0), "/mnt/data1");
        assert_eq!(plan.mount_target_for(1), "/mnt/data2");
        assert_eq!(plan.mount_target_for(2), "/mnt/data1");
        assert_eq!(plan.mount_target_for(5), "/mnt/data2");
    }

    #[test]
    fn empty_mount_pool_falls_back_to_default_target() {
        let plan = plan_with_mounts(Vec::new());
        assert_eq!(plan.mount_target_for(3), "/mnt/data1");
    }

    #[test]
    fn batch_summary_counts_outcomes() {
        let summary = BatchSummary {
            reports: vec![
                JobReport {
                    snapshot_id: String::from("snap-1"),
                    volume_id: Some(String::from("vol-1")),
                    result: Ok(ExportOutcome {
                        volume_id: String::from("vol-1"),
                        object_prefix: String::from("ledger/vol-1-ts/"),
                        stdout: String::new(),
                    }),
                    cleanup_failures: vec![CleanupFailure {
                        action: "delete",
                        volume_id: String::from("vol-1"),
                        message: String::from("still detaching"),
                    }],
                },
                JobReport::failed(
                    "snap-2",
                    None,
                    JobFailure::CreateVolume {
                        snapshot_id: String::from("snap-2"),
                        message: String::from("quota exceeded"),
                    },
                ),
            ],
        };

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.cleanup_failures(), 1);
    }
}
