// SPDX-License-Identifier: GPL-3.0-only
#![allow(dead_code)]

//! In-memory stand-ins for the host: every partition is a directory below a
//! scratch directory, mounting a partition hands out that directory.

use std::collections::HashMap;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use livecopy_contracts::{
    DeviceResolver, FsUsage, LineFn, MountAccess, ProgressFn, ProgressReporter, SystemTools,
    ToolError,
};
use livecopy_core::{Session, SessionConfig, SystemSource};
use livecopy_types::{
    DeviceType, MountEntry, OperationMode, Partition, PartitionLayout, RepartitionPlan,
    StorageDevice, StorageDeviceResult, partition_device_name,
};

pub const GIB: u64 = 1024 * 1024 * 1024;

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

fn used_bytes(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .map(|entry| {
            let entry = entry.unwrap();
            let metadata = entry.metadata().unwrap();
            if metadata.is_dir() {
                used_bytes(&entry.path())
            } else {
                metadata.len()
            }
        })
        .sum()
}

pub fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    failures: Vec<(String, String)>,
    mounted: Vec<MountEntry>,
    host_mounts: Vec<MountEntry>,
}

pub struct FakeTools {
    scratch: TempDir,
    state: Mutex<State>,
    overlays: AtomicUsize,
}

impl FakeTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scratch: tempfile::tempdir().unwrap(),
            state: Mutex::new(State::default()),
            overlays: AtomicUsize::new(0),
        })
    }

    /// Directory standing in for the content of `source` ("/dev/sdb3").
    pub fn dir(&self, source: &str) -> PathBuf {
        let name = source.trim_start_matches('/').replace('/', "_");
        let dir = self.scratch.path().join("parts").join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Directory a loop-mounted image with this file name shows.
    pub fn image_dir(&self, file_name: &str) -> PathBuf {
        let dir = self.scratch.path().join("images").join(file_name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Fail every `operation` call whose rendered arguments contain `needle`.
    pub fn fail_when(&self, operation: &str, needle: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((operation.to_string(), needle.to_string()));
    }

    /// Pretend the running system booted from `device` ("/dev/sdb1").
    pub fn boot_from(&self, partition: &str) {
        self.state.lock().unwrap().host_mounts.push(MountEntry {
            source: partition.to_string(),
            mount_point: PathBuf::from("/run/live/medium"),
            fs_type: "vfat".to_string(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls of one operation, without the operation name.
    pub fn calls_of(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{operation} ");
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn mounted(&self) -> Vec<MountEntry> {
        self.state.lock().unwrap().mounted.clone()
    }

    fn record(&self, operation: &str, args: &[&str]) -> Result<(), ToolError> {
        let rendered = args.join(" ");
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{operation} {rendered}"));
        let injected = state
            .failures
            .iter()
            .any(|(op, needle)| op == operation && rendered.contains(needle.as_str()));
        if injected {
            Err(ToolError::CommandFailed {
                command: format!("{operation} {rendered}"),
                code: Some(1),
                stderr: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn hold(&self, source: &str, mount_point: &Path, fs_type: &str) {
        self.state.lock().unwrap().mounted.push(MountEntry {
            source: source.to_string(),
            mount_point: mount_point.to_path_buf(),
            fs_type: fs_type.to_string(),
        });
    }
}

#[async_trait]
impl SystemTools for FakeTools {
    async fn create_partitions(&self, device: &str, layout: &PartitionLayout) -> Result<(), ToolError> {
        self.record("partition", &[device])?;
        let name = device.trim_start_matches("/dev/");
        for spec in &layout.partitions {
            let dir = self.dir(&format!("/dev/{}", partition_device_name(name, spec.number)));
            fs::remove_dir_all(&dir).unwrap();
            fs::create_dir_all(&dir).unwrap();
        }
        Ok(())
    }

    async fn repartition(&self, device: &StorageDevice, plan: &RepartitionPlan) -> Result<(), ToolError> {
        let exchange = plan.exchange_mib.to_string();
        let data = plan.data_mib.to_string();
        self.record("repartition", &[&device.path(), &exchange, &data])
    }

    async fn format(&self, partition: &str, fs_type: &str, label: &str) -> Result<(), ToolError> {
        self.record("format", &[partition, fs_type, label])?;
        let dir = self.dir(partition);
        fs::remove_dir_all(&dir).unwrap();
        fs::create_dir_all(&dir).unwrap();
        if fs_type.starts_with("ext") {
            fs::create_dir(dir.join("lost+found")).unwrap();
        }
        Ok(())
    }

    async fn overwrite_random(&self, partition: &str, _size: u64, progress: ProgressFn<'_>) -> Result<(), ToolError> {
        self.record("overwrite", &[partition])?;
        progress(50);
        progress(100);
        Ok(())
    }

    async fn luks_format(&self, partition: &str, passphrases: &[String]) -> Result<(), ToolError> {
        let count = passphrases.len().to_string();
        self.record("luks_format", &[partition, &count])
    }

    async fn luks_open(&self, partition: &str, _passphrase: &str, name: &str) -> Result<String, ToolError> {
        self.record("luks_open", &[partition, name])?;
        Ok(format!("/dev/mapper/{name}"))
    }

    async fn luks_close(&self, name: &str) -> Result<(), ToolError> {
        self.record("luks_close", &[name])
    }

    async fn mount(&self, source: &str, access: MountAccess) -> Result<PathBuf, ToolError> {
        let access = match access {
            MountAccess::ReadOnly => "ro",
            MountAccess::ReadWrite => "rw",
        };
        self.record("mount", &[source, access])?;
        let mount_point = self.dir(source);
        self.hold(source, &mount_point, "auto");
        Ok(mount_point)
    }

    async fn mount_loop(&self, image: &Path) -> Result<PathBuf, ToolError> {
        let image_name = image.display().to_string();
        self.record("mount_loop", &[&image_name])?;
        let file_name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mount_point = self.image_dir(&file_name);
        self.hold(&image_name, &mount_point, "squashfs");
        Ok(mount_point)
    }

    async fn mount_overlay(&self, lower: &[PathBuf], upper: &Path, work: &Path) -> Result<PathBuf, ToolError> {
        let upper_name = upper.display().to_string();
        self.record("mount_overlay", &[&upper_name])?;
        assert!(work.is_dir(), "overlay work directory missing");
        let n = self.overlays.fetch_add(1, Ordering::SeqCst);
        let merged = self.scratch.path().join(format!("overlay-{n}"));
        for layer in lower.iter().rev() {
            copy_dir(layer, &merged);
        }
        copy_dir(upper, &merged);
        self.hold("overlay", &merged, "overlay");
        Ok(merged)
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        let rendered = mount_point.display().to_string();
        self.record("unmount", &[&rendered])?;
        let mut state = self.state.lock().unwrap();
        match state.mounted.iter().rposition(|m| m.mount_point == mount_point) {
            Some(index) => {
                state.mounted.remove(index);
                Ok(())
            }
            None => Err(ToolError::Other(format!("{rendered} is not mounted"))),
        }
    }

    async fn active_mounts(&self) -> Result<Vec<MountEntry>, ToolError> {
        let state = self.state.lock().unwrap();
        Ok(state.host_mounts.iter().chain(&state.mounted).cloned().collect())
    }

    async fn filesystem_usage(&self, mount_point: &Path) -> Result<FsUsage, ToolError> {
        Ok(FsUsage {
            total: 8 * GIB,
            used: used_bytes(mount_point),
        })
    }

    async fn install_bootloader(&self, device: &str, efi: &Path) -> Result<(), ToolError> {
        assert!(
            self.mounted().iter().any(|m| m.mount_point == efi),
            "bootloader installed into an unmounted EFI partition"
        );
        self.record("bootloader", &[device])
    }

    async fn backup(&self, source: &Path, destination: &Path, incremental: bool, lines: LineFn<'_>) -> Result<(), ToolError> {
        let from = source.display().to_string();
        let to = destination.display().to_string();
        self.record("backup", &[&from, &to, if incremental { "incremental" } else { "full" }])?;
        copy_dir(source, destination);
        lines("Processed 12/48 files");
        lines("42% done");
        lines("backup finished");
        Ok(())
    }

    async fn run_script(&self, script: &str, lines: LineFn<'_>) -> Result<(), ToolError> {
        self.record("script", &[])?;
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .output()
            .map_err(ToolError::from)?;
        for line in output.stdout.lines() {
            lines(&line.map_err(ToolError::from)?);
        }
        lines("12/48");
        lines("42% done");
        if output.status.success() {
            Ok(())
        } else {
            Err(ToolError::CommandFailed {
                command: "sh -c".to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn print_document(&self, document: &Path) -> Result<(), ToolError> {
        let rendered = document.display().to_string();
        self.record("print", &[&rendered])
    }

    async fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> Result<(), ToolError> {
        let rendered = path.display().to_string();
        let owner = format!("{uid}:{gid}");
        self.record("chown", &[&rendered, &owner])
    }
}

/// Resolver answering from a fixed device table.
#[derive(Default)]
pub struct FakeResolver {
    devices: Mutex<HashMap<String, StorageDevice>>,
    pending: Mutex<HashMap<String, usize>>,
    lookups: AtomicUsize,
}

impl FakeResolver {
    pub fn new(devices: impl IntoIterator<Item = StorageDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices.into_iter().map(|d| (d.device.clone(), d)).collect()),
            pending: Mutex::default(),
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn add(&self, device: StorageDevice) {
        self.devices.lock().unwrap().insert(device.device.clone(), device);
    }

    /// Answer "not found" for the first `misses` lookups of `device`.
    pub fn add_after(&self, device: StorageDevice, misses: usize) {
        self.pending.lock().unwrap().insert(device.device.clone(), misses);
        self.add(device);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceResolver for FakeResolver {
    async fn resolve(&self, name: &str) -> Result<Option<StorageDevice>, ToolError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(misses) = self.pending.lock().unwrap().get_mut(name)
            && *misses > 0
        {
            *misses -= 1;
            return Ok(None);
        }
        Ok(self.devices.lock().unwrap().get(name).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<StorageDevice>, ToolError> {
        let mut devices: Vec<_> = self.devices.lock().unwrap().values().cloned().collect();
        devices.sort();
        Ok(devices)
    }
}

/// Reporter remembering everything it was told.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<u8>>,
    pub selection: Mutex<Option<usize>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn percentages(&self) -> Vec<u8> {
        self.progress.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressReporter for RecordingReporter {
    fn batch_started(&self, mode: OperationMode, devices: usize) {
        self.push(format!("batch_started {mode} {devices}"));
    }

    fn device_started(&self, _mode: OperationMode, device: &StorageDevice, index: usize, total: usize) {
        self.push(format!("device_started {} {index}/{total}", device.path()));
    }

    fn step(&self, step: &str) {
        self.push(format!("step {step}"));
    }

    fn progress(&self, percent: u8) {
        self.progress.lock().unwrap().push(percent);
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn device_finished(&self, _mode: OperationMode, result: &StorageDeviceResult) {
        self.push(format!("device_finished {} {}", result.device.path(), result.succeeded()));
    }

    fn batch_finished(&self, mode: OperationMode, results: &[StorageDeviceResult]) {
        self.push(format!("batch_finished {mode} {}", results.len()));
    }

    fn select_documents(&self, documents: &[PathBuf]) -> Vec<PathBuf> {
        match *self.selection.lock().unwrap() {
            Some(count) => documents.iter().take(count).cloned().collect(),
            None => documents.to_vec(),
        }
    }
}

pub fn blank_stick(name: &str, size: u64) -> StorageDevice {
    StorageDevice {
        device: name.to_string(),
        device_type: DeviceType::UsbFlashDrive,
        vendor: "Kingston".to_string(),
        model: "DataTraveler".to_string(),
        serial: format!("SN-{name}"),
        revision: "PMAP".to_string(),
        size,
        removable: true,
        raid: None,
        partitions: Vec::new(),
    }
}

/// Stick carrying an installed system: EFI, exchange, data, system.
pub fn installed_stick(name: &str, data_type: &str) -> StorageDevice {
    let mut device = blank_stick(name, 16 * GIB);
    let part = |number: u32, offset: u64, size: u64, id_type: &str, label: &str| {
        Partition::new(name, number, partition_device_name(name, number), offset, size, id_type, label)
    };
    device.partitions = vec![
        part(1, GIB / 1024, 200 * 1024 * 1024, "vfat", "EFI"),
        part(2, GIB, 4 * GIB, "vfat", "Exchange"),
        part(3, 5 * GIB, 6 * GIB, data_type, if data_type == "crypto_LUKS" { "" } else { "persistence" }),
        part(4, 11 * GIB, 5 * GIB, "vfat", "system"),
    ];
    device
}

pub fn session(tools: Arc<FakeTools>, resolver: Arc<FakeResolver>) -> Arc<Session> {
    let config = SessionConfig {
        show_hard_disks: false,
        resolve_interval_ms: 10,
        resolve_timeout_ms: 100,
        unmount_grace_ms: 0,
    };
    Arc::new(Session::new(tools, resolver, config))
}

/// A live medium directory with a tiny system.
pub struct Medium {
    pub dir: TempDir,
}

impl Medium {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".disk/info"), "Debian GNU/Linux 12 Live\n");
        write(&dir.path().join("live/filesystem.squashfs"), "squashfs image");
        write(&dir.path().join("live/vmlinuz"), "kernel");
        write(&dir.path().join("EFI/boot/bootx64.efi"), "efi binary");
        write(
            &dir.path().join("boot/grub/grub.cfg"),
            "menuentry Live {\n  linux /live/vmlinuz boot=live components\n}\n",
        );
        Self { dir }
    }

    pub async fn source(&self) -> Arc<SystemSource> {
        Arc::new(SystemSource::from_medium(self.dir.path()).await.unwrap())
    }
}
