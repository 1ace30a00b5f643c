//! End-to-end behaviour tests for the export orchestrator, driven against an
//! in-memory provider double.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use snapexport::{
    CommandApi, CommandInvocation, CommandStatus, DeviceAllocator, ExportOrchestrator, ExportPlan,
    JobFailure, ProviderFuture, SubmittedCommand, VolumeApi, VolumeHandle, VolumeRecord,
    VolumeRequest, VolumeState,
};

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake cloud error: {0}")]
struct FakeCloudError(String);

#[derive(Debug)]
struct FakeVolume {
    id: String,
    snapshot_id: String,
}

#[derive(Debug)]
struct FakeCommand {
    id: String,
    command: String,
    working_dir: String,
}

#[derive(Debug, Default)]
struct FakeCloudState {
    volume_counter: usize,
    command_counter: usize,
    volumes: Vec<FakeVolume>,
    commands: Vec<FakeCommand>,
    attachments: HashMap<String, String>,
    detach_calls: Vec<String>,
    delete_calls: Vec<String>,
    failing_exports: Vec<String>,
    failing_mounts: Vec<String>,
    hold_exports: bool,
}

/// In-memory stand-in for the compute gateway: volumes become available
/// immediately, commands finish on their first status poll unless scripted
/// otherwise.
#[derive(Clone, Default)]
struct FakeCloud {
    state: Arc<Mutex<FakeCloudState>>,
}

impl FakeCloud {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeCloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_hold_exports(&self, hold: bool) {
        self.lock().hold_exports = hold;
    }

    fn fail_export_for(&self, snapshot_id: &str) {
        self.lock().failing_exports.push(snapshot_id.to_owned());
    }

    fn fail_mount_at(&self, mount_target: &str) {
        self.lock().failing_mounts.push(mount_target.to_owned());
    }

    fn delete_count(&self) -> usize {
        self.lock().delete_calls.len()
    }

    fn detach_calls(&self) -> Vec<String> {
        self.lock().detach_calls.clone()
    }

    fn attached_count(&self) -> usize {
        self.lock().attachments.len()
    }

    fn export_commands(&self) -> Vec<(String, String)> {
        self.lock()
            .commands
            .iter()
            .filter(|command| command.command.starts_with("aws s3 cp"))
            .map(|command| (command.command.clone(), command.working_dir.clone()))
            .collect()
    }

    fn invocation_for(state: &FakeCloudState, command: &FakeCommand) -> CommandInvocation {
        if command.command.starts_with("mountpoint -q") {
            return success("");
        }

        if command.command.starts_with("sudo mkdir -p") {
            let failing = state
                .failing_mounts
                .iter()
                .any(|target| command.command.contains(target.as_str()));
            if failing {
                return failed("mount: wrong fs type, bad option, bad superblock");
            }
            return success("");
        }

        if command.command.starts_with("aws s3 cp") {
            if state.hold_exports {
                return CommandInvocation {
                    status: CommandStatus::InProgress,
                    stdout: String::new(),
                    stderr: String::new(),
                };
            }
            let volume = state
                .volumes
                .iter()
                .find(|candidate| command.command.contains(candidate.id.as_str()));
            let failing = volume.is_some_and(|owner| {
                state
                    .failing_exports
                    .iter()
                    .any(|snapshot| snapshot == &owner.snapshot_id)
            });
            if failing {
                return failed("upload failed: Access Denied");
            }
            return success("copied 4 files");
        }

        success("")
    }
}

fn success(stdout: &str) -> CommandInvocation {
    CommandInvocation {
        status: CommandStatus::Success,
        stdout: stdout.to_owned(),
        stderr: String::new(),
    }
}

fn failed(stderr: &str) -> CommandInvocation {
    CommandInvocation {
        status: CommandStatus::Failed,
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

impl VolumeApi for FakeCloud {
    type Error = FakeCloudError;

    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> ProviderFuture<'a, VolumeHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.volume_counter += 1;
            let id = format!("vol-{}", state.volume_counter);
            state.volumes.push(FakeVolume {
                id: id.clone(),
                snapshot_id: request.snapshot_id.clone(),
            });
            Ok(VolumeHandle {
                id,
                zone: request.zone.clone(),
            })
        })
    }

    fn describe_volume<'a>(
        &'a self,
        _handle: &'a VolumeHandle,
    ) -> ProviderFuture<'a, VolumeState, Self::Error> {
        Box::pin(async move { Ok(VolumeState::Available) })
    }

    fn attach_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
        _instance_id: &'a str,
        device: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let device_taken = state
                .attachments
                .values()
                .any(|attached| attached == device);
            if device_taken {
                return Err(FakeCloudError(format!("device {device} already in use")));
            }
            state
                .attachments
                .insert(handle.id.clone(), device.to_owned());
            Ok(())
        })
    }

    fn detach_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
        _instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.detach_calls.push(handle.id.clone());
            state.attachments.remove(&handle.id);
            Ok(())
        })
    }

    fn delete_volume<'a>(
        &'a self,
        handle: &'a VolumeHandle,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.delete_calls.push(handle.id.clone());
            Ok(())
        })
    }

    fn list_volumes<'a>(
        &'a self,
        _zone: &'a str,
        _tag: &'a str,
    ) -> ProviderFuture<'a, Vec<VolumeRecord>, Self::Error> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

impl CommandApi for FakeCloud {
    type Error = FakeCloudError;

    fn submit_command<'a>(
        &'a self,
        _instance_id: &'a str,
        command: &'a str,
        working_dir: &'a str,
    ) -> ProviderFuture<'a, SubmittedCommand, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.command_counter += 1;
            let id = format!("cmd-{}", state.command_counter);
            state.commands.push(FakeCommand {
                id: id.clone(),
                command: command.to_owned(),
                working_dir: working_dir.to_owned(),
            });
            Ok(SubmittedCommand { command_id: id })
        })
    }

    fn command_invocation<'a>(
        &'a self,
        _instance_id: &'a str,
        command_id: &'a str,
    ) -> ProviderFuture<'a, CommandInvocation, Self::Error> {
        Box::pin(async move {
            let state = self.lock();
            let command = state
                .commands
                .iter()
                .find(|candidate| candidate.id == command_id)
                .ok_or_else(|| FakeCloudError(format!("unknown command {command_id}")))?;
            Ok(FakeCloud::invocation_for(&state, command))
        })
    }
}

fn test_plan() -> ExportPlan {
    ExportPlan {
        instance_id: String::from("i-test"),
        availability_zone: String::from("zone-a"),
        bucket: String::from("backups"),
        application_name: String::from("ledger"),
        application_prefix: String::from("ledger"),
        mount_points: vec![
            String::from("/mnt/data1"),
            String::from("/mnt/data2"),
            String::from("/mnt/data3"),
        ],
        poll_interval: Duration::from_millis(2),
        stage_timeout: Duration::from_secs(5),
        max_concurrent_jobs: None,
    }
}

fn orchestrator(
    cloud: &FakeCloud,
    devices: DeviceAllocator,
) -> ExportOrchestrator<FakeCloud, FakeCloud> {
    ExportOrchestrator::new(
        cloud.clone(),
        cloud.clone(),
        devices,
        test_plan(),
        CancellationToken::new(),
    )
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() <= deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met within 2s: {description}");
}

#[tokio::test]
async fn single_snapshot_round_trip_exports_and_cleans_up() {
    let cloud = FakeCloud::default();
    let devices = DeviceAllocator::new();
    let runner = orchestrator(&cloud, devices.clone());

    let summary = runner.run(vec![String::from("snap-1")]).await;

    assert_eq!(summary.succeeded(), 1);
    let report = summary.reports.first().expect("one report");
    let outcome = report.result.as_ref().expect("job succeeded");
    assert!(
        outcome.object_prefix.starts_with("ledger/vol-1-"),
        "unexpected prefix: {}",
        outcome.object_prefix
    );

    let exports = cloud.export_commands();
    let (command, working_dir) = exports.first().expect("one export command");
    assert_eq!(working_dir, "/mnt/data1");
    assert!(command.contains("s3://backups/ledger/vol-1-"));
    assert!(command.contains("--include 'ledger-*'"));

    assert_eq!(cloud.detach_calls(), vec![String::from("vol-1")]);
    assert_eq!(cloud.delete_count(), 1);
    assert_eq!(cloud.attached_count(), 0);
    assert_eq!(devices.allocated_count(), 0);
}

#[tokio::test]
async fn exhausted_slots_fail_one_job_and_leak_nothing() {
    let cloud = FakeCloud::default();
    cloud.set_hold_exports(true);
    let devices = DeviceAllocator::with_letters("ef".chars());
    let runner = orchestrator(&cloud, devices.clone());

    let run = tokio::spawn(async move {
        runner
            .run(vec![
                String::from("snap-1"),
                String::from("snap-2"),
                String::from("snap-3"),
            ])
            .await
    });

    // Two jobs hold both slots inside the gated export; the third must have
    // aborted and deleted its volume before the gate opens.
    let watcher = cloud.clone();
    wait_until("losing job deletes its volume", move || {
        watcher.delete_count() >= 1
    })
    .await;
    cloud.set_hold_exports(false);

    let summary = run.await.expect("run completes");
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);

    let failure = summary
        .reports
        .iter()
        .find_map(|report| report.result.as_ref().err())
        .expect("one failed report");
    assert!(
        matches!(failure, JobFailure::DeviceSlotsExhausted { .. }),
        "got {failure:?}"
    );

    assert_eq!(cloud.delete_count(), 3, "every created volume is deleted");
    assert_eq!(cloud.attached_count(), 0);
    assert_eq!(devices.allocated_count(), 0);
}

#[tokio::test]
async fn failed_export_command_reports_stderr_and_still_cleans_up() {
    let cloud = FakeCloud::default();
    cloud.fail_export_for("snap-bad");
    let devices = DeviceAllocator::new();
    let runner = orchestrator(&cloud, devices.clone());

    let summary = runner.run(vec![String::from("snap-bad")]).await;

    assert_eq!(summary.failed(), 1);
    let report = summary.reports.first().expect("one report");
    let failure = report.result.as_ref().expect_err("job failed");
    match failure {
        JobFailure::ExportCommandFailed { status, stderr, .. } => {
            assert_eq!(*status, CommandStatus::Failed);
            assert!(stderr.contains("Access Denied"), "stderr: {stderr}");
        }
        other => panic!("unexpected failure: {other:?}"),
    }

    assert_eq!(cloud.detach_calls(), vec![String::from("vol-1")]);
    assert_eq!(cloud.delete_count(), 1);
    assert_eq!(devices.allocated_count(), 0);
}

#[tokio::test]
async fn failed_mount_releases_slot_and_deletes_volume() {
    let cloud = FakeCloud::default();
    cloud.fail_mount_at("/mnt/data1");
    let devices = DeviceAllocator::new();
    let runner = orchestrator(&cloud, devices.clone());

    let summary = runner.run(vec![String::from("snap-1")]).await;

    assert_eq!(summary.failed(), 1);
    let report = summary.reports.first().expect("one report");
    let failure = report.result.as_ref().expect_err("job failed");
    assert!(
        matches!(failure, JobFailure::MountCommandFailed { stderr, .. } if stderr.contains("wrong fs type")),
        "got {failure:?}"
    );

    assert_eq!(cloud.detach_calls(), vec![String::from("vol-1")]);
    assert_eq!(cloud.delete_count(), 1);
    assert_eq!(cloud.attached_count(), 0);
    assert_eq!(devices.allocated_count(), 0);
}

#[tokio::test]
async fn jobs_share_one_batch_timestamp() {
    let cloud = FakeCloud::default();
    let runner = orchestrator(&cloud, DeviceAllocator::new());

    let summary = runner
        .run(vec![String::from("snap-1"), String::from("snap-2")])
        .await;

    assert_eq!(summary.succeeded(), 2);
    let suffixes: Vec<String> = summary
        .reports
        .iter()
        .map(|report| {
            let outcome = report.result.as_ref().expect("job succeeded");
            let volume_id = report.volume_id.as_deref().expect("volume recorded");
            outcome
                .object_prefix
                .trim_start_matches("ledger/")
                .trim_start_matches(volume_id)
                .to_owned()
        })
        .collect();
    assert_eq!(suffixes.first(), suffixes.get(1), "timestamps differ");
}
