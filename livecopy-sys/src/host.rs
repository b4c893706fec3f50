// SPDX-License-Identifier: GPL-3.0-only

//! [`SystemTools`] on the real host
//!
//! Every operation shells out to the standard Linux tools. Mount points are
//! created below a private root and removed again on unmount.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::unistd::{Gid, Uid, chown};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use livecopy_contracts::{
    FsUsage, LineFn, MountAccess, ProgressFn, SystemTools, ToolError,
};
use livecopy_types::{
    MountEntry, PartitionLayout, PartitionRole, RepartitionPlan, StorageDevice, bytes_to_mib,
};

use crate::{cmd, mounts, wipe};

#[derive(Debug, Clone)]
pub struct HostTools {
    mount_root: PathBuf,
}

impl Default for HostTools {
    fn default() -> Self {
        Self::with_mount_root(std::env::temp_dir())
    }
}

impl HostTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount_root(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
        }
    }

    async fn mount_dir(&self) -> Result<PathBuf, ToolError> {
        let dir = self.mount_root.join(format!("livecopy-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|error| ToolError::io(format!("creating {}", dir.display()), error))?;
        Ok(dir)
    }

    /// Run `mount <args> <new dir>` and return the new directory.
    async fn mount_with(&self, args: &[&str]) -> Result<PathBuf, ToolError> {
        let dir = self.mount_dir().await?;
        let target = dir.to_string_lossy().to_string();
        let mut full = args.to_vec();
        full.push(&target);
        if let Err(error) = cmd::run("mount", &full).await {
            let _ = tokio::fs::remove_dir(&dir).await;
            return Err(error);
        }
        Ok(dir)
    }

    async fn settle(&self, device: &str) -> Result<(), ToolError> {
        cmd::run("partprobe", &[device]).await?;
        if let Err(error) = cmd::run("udevadm", &["settle"]).await {
            warn!(%error, "udevadm settle failed");
        }
        Ok(())
    }

    async fn sfdisk(&self, args: &[&str], script: &str) -> Result<(), ToolError> {
        cmd::run_with_input("sfdisk", args, Some(script)).await?;
        Ok(())
    }

    /// e2fsck exits with 1 when it corrected errors.
    async fn check_ext(&self, partition: &str) -> Result<(), ToolError> {
        match cmd::run("e2fsck", &["-f", "-y", partition]).await {
            Ok(_) => Ok(()),
            Err(ToolError::CommandFailed { code: Some(1), .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Write `secret` to a private key file below the mount root.
    fn write_key_file(&self, secret: &str) -> Result<PathBuf, ToolError> {
        let path = self.mount_root.join(format!("livecopy-key-{}", Uuid::new_v4()));
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(|error| ToolError::io("creating key file", error))?;
        file.write_all(secret.as_bytes())
            .map_err(|error| ToolError::io("writing key file", error))?;
        Ok(path)
    }
}

fn parted_fs_hint(role: PartitionRole) -> &'static str {
    match role {
        PartitionRole::Data | PartitionRole::Other => "ext4",
        PartitionRole::Efi | PartitionRole::Exchange | PartitionRole::System => "fat32",
    }
}

/// Symlinks keep their owner; chown would follow them out of the tree.
fn chown_tree(path: &Path, owner: Uid, group: Gid) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    chown(path, Some(owner), Some(group))?;
    if metadata.is_dir() {
        for child in std::fs::read_dir(path)? {
            chown_tree(&child?.path(), owner, group)?;
        }
    }
    Ok(())
}

#[async_trait]
impl SystemTools for HostTools {
    async fn create_partitions(
        &self,
        device: &str,
        layout: &PartitionLayout,
    ) -> Result<(), ToolError> {
        info!(device, partitions = layout.partitions.len(), "creating partition table");

        let mut args: Vec<String> = ["-s", "-a", "optimal", device, "mklabel", "msdos"]
            .into_iter()
            .map(String::from)
            .collect();
        let last = layout.partitions.len().saturating_sub(1);
        for (index, spec) in layout.partitions.iter().enumerate() {
            let end = if index == last {
                "100%".to_string()
            } else {
                format!("{}MiB", spec.end_mib())
            };
            args.extend([
                "mkpart".to_string(),
                "primary".to_string(),
                parted_fs_hint(spec.role).to_string(),
                format!("{}MiB", spec.start_mib),
                end,
            ]);
        }
        if let Some(efi) = layout.number_of(PartitionRole::Efi) {
            for flag in ["boot", "esp"] {
                args.extend(["set".to_string(), efi.to_string(), flag.to_string(), "on".to_string()]);
            }
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run("parted", &args).await?;
        self.settle(device).await
    }

    async fn repartition(
        &self,
        device: &StorageDevice,
        plan: &RepartitionPlan,
    ) -> Result<(), ToolError> {
        let exchange = device
            .exchange_partition()
            .ok_or_else(|| ToolError::Unsupported("device has no exchange partition".into()))?;
        let data = device
            .data_partition()
            .ok_or_else(|| ToolError::Unsupported("device has no data partition".into()))?;
        if data.is_encrypted() {
            return Err(ToolError::Unsupported(
                "resizing an encrypted data partition".into(),
            ));
        }

        let device_path = device.path();
        let data_path = data.path();
        let data_number = data.number.to_string();
        let exchange_number = exchange.number.to_string();
        let exchange_start = bytes_to_mib(exchange.offset);
        let data_start = exchange_start + plan.exchange_mib;
        let move_data = format!("{data_start}M,{}M\n", plan.data_mib);
        let resize_exchange = format!("{exchange_start}M,{}M\n", plan.exchange_mib);
        let sfdisk_data = ["--no-reread", "--move-data", "-N", data_number.as_str(), device_path.as_str()];
        let sfdisk_exchange = ["--no-reread", "-N", exchange_number.as_str(), device_path.as_str()];

        info!(
            device = %device_path,
            exchange_mib = plan.exchange_mib,
            data_mib = plan.data_mib,
            "repartitioning"
        );

        if plan.data_mib < bytes_to_mib(data.size) {
            // shrink the data filesystem before its partition moves up
            self.check_ext(&data_path).await?;
            let size = format!("{}M", plan.data_mib);
            cmd::run("resize2fs", &[data_path.as_str(), size.as_str()]).await?;
            self.sfdisk(&sfdisk_data, &move_data).await?;
            self.sfdisk(&sfdisk_exchange, &resize_exchange).await?;
        } else {
            if plan.removes_exchange() {
                cmd::run(
                    "sfdisk",
                    &["--no-reread", "--delete", device_path.as_str(), exchange_number.as_str()],
                )
                .await?;
            } else {
                self.sfdisk(&sfdisk_exchange, &resize_exchange).await?;
            }
            self.sfdisk(&sfdisk_data, &move_data).await?;
            self.settle(&device_path).await?;
            self.check_ext(&data_path).await?;
            cmd::run("resize2fs", &[data_path.as_str()]).await?;
        }

        self.settle(&device_path).await
    }

    async fn format(&self, partition: &str, fs_type: &str, label: &str) -> Result<(), ToolError> {
        info!(partition, fs_type, label, "formatting");
        let (program, mut args): (String, Vec<&str>) = match fs_type {
            "vfat" => ("mkfs.vfat".into(), vec!["-F", "32", "-n", label]),
            "exfat" => ("mkfs.exfat".into(), vec!["-L", label]),
            "ntfs" => ("mkntfs".into(), vec!["-f", "-F", "-L", label]),
            "ext2" | "ext3" | "ext4" => (format!("mkfs.{fs_type}"), vec!["-F", "-L", label]),
            other => return Err(ToolError::Unsupported(format!("filesystem {other}"))),
        };
        args.push(partition);
        cmd::run(&program, &args).await?;
        Ok(())
    }

    async fn overwrite_random(
        &self,
        partition: &str,
        size: u64,
        progress: ProgressFn<'_>,
    ) -> Result<(), ToolError> {
        info!(partition, size, "overwriting with random data");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let target = PathBuf::from(partition);
        let task = tokio::task::spawn_blocking(move || {
            wipe::overwrite_random(&target, size, |percent| {
                let _ = tx.send(percent);
            })
        });
        while let Some(percent) = rx.recv().await {
            progress(percent);
        }
        task.await
            .map_err(|error| ToolError::other(format!("random overwrite task failed: {error}")))?
            .map_err(|error| ToolError::io(format!("overwriting {partition}"), error))?;
        Ok(())
    }

    async fn luks_format(&self, partition: &str, passphrases: &[String]) -> Result<(), ToolError> {
        let (first, additional) = passphrases
            .split_first()
            .ok_or_else(|| ToolError::other("LUKS format needs at least one passphrase"))?;

        info!(partition, key_slots = passphrases.len(), "creating LUKS container");
        cmd::run_with_input(
            "cryptsetup",
            &["-q", "luksFormat", "--type", "luks2", "--key-file=-", partition],
            Some(first.as_str()),
        )
        .await?;

        for passphrase in additional {
            let key_file = self.write_key_file(passphrase)?;
            let key_path = key_file.to_string_lossy().to_string();
            let result = cmd::run_with_input(
                "cryptsetup",
                &["-q", "luksAddKey", "--key-file=-", partition, key_path.as_str()],
                Some(first.as_str()),
            )
            .await;
            let _ = tokio::fs::remove_file(&key_file).await;
            result?;
        }
        Ok(())
    }

    async fn luks_open(
        &self,
        partition: &str,
        passphrase: &str,
        name: &str,
    ) -> Result<String, ToolError> {
        cmd::run_with_input(
            "cryptsetup",
            &["open", "--type", "luks", "--key-file=-", partition, name],
            Some(passphrase),
        )
        .await?;
        Ok(format!("/dev/mapper/{name}"))
    }

    async fn luks_close(&self, name: &str) -> Result<(), ToolError> {
        cmd::run("cryptsetup", &["close", name]).await?;
        Ok(())
    }

    async fn mount(&self, source: &str, access: MountAccess) -> Result<PathBuf, ToolError> {
        let options = match access {
            MountAccess::ReadOnly => "ro",
            MountAccess::ReadWrite => "rw",
        };
        self.mount_with(&["-o", options, source]).await
    }

    async fn mount_loop(&self, image: &Path) -> Result<PathBuf, ToolError> {
        let image = image.to_string_lossy().to_string();
        self.mount_with(&["-o", "loop,ro", image.as_str()]).await
    }

    async fn mount_overlay(
        &self,
        lower: &[PathBuf],
        upper: &Path,
        work: &Path,
    ) -> Result<PathBuf, ToolError> {
        let lowerdir = lower
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(":");
        let options = format!(
            "lowerdir={lowerdir},upperdir={},workdir={}",
            upper.display(),
            work.display()
        );
        self.mount_with(&["-t", "overlay", "overlay", "-o", options.as_str()])
            .await
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        let target = mount_point.to_string_lossy().to_string();
        cmd::run("umount", &[target.as_str()]).await?;
        if mount_point.starts_with(&self.mount_root) {
            if let Err(error) = tokio::fs::remove_dir(mount_point).await {
                debug!(%error, mount_point = %target, "mount point not removed");
            }
        }
        Ok(())
    }

    async fn active_mounts(&self) -> Result<Vec<MountEntry>, ToolError> {
        mounts::read_mounts()
    }

    async fn filesystem_usage(&self, mount_point: &Path) -> Result<FsUsage, ToolError> {
        let stat = nix::sys::statvfs::statvfs(mount_point).map_err(|errno| {
            ToolError::io(
                format!("statvfs {}", mount_point.display()),
                std::io::Error::from(errno),
            )
        })?;
        let fragment = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * fragment;
        let free = stat.blocks_free() as u64 * fragment;
        Ok(FsUsage {
            total,
            used: total.saturating_sub(free),
        })
    }

    async fn install_bootloader(&self, device: &str, efi: &Path) -> Result<(), ToolError> {
        let efi_directory = format!("--efi-directory={}", efi.display());
        let boot_directory = format!("--boot-directory={}", efi.join("boot").display());
        info!(device, "installing bootloader");
        cmd::run(
            "grub-install",
            &[
                "--target=x86_64-efi",
                "--removable",
                "--no-nvram",
                efi_directory.as_str(),
                boot_directory.as_str(),
                device,
            ],
        )
        .await?;

        // legacy BIOS boot is optional; hosts without i386-pc modules skip it
        if let Err(error) = cmd::run(
            "grub-install",
            &["--target=i386-pc", boot_directory.as_str(), device],
        )
        .await
        {
            warn!(device, %error, "BIOS bootloader not installed");
        }
        Ok(())
    }

    async fn backup(
        &self,
        source: &Path,
        destination: &Path,
        incremental: bool,
        lines: LineFn<'_>,
    ) -> Result<(), ToolError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| ToolError::io(format!("creating {}", parent.display()), error))?;
        }
        let source = source.to_string_lossy().to_string();
        let destination = destination.to_string_lossy().to_string();
        let mut args = vec!["--print-statistics"];
        if !incremental {
            args.push("--force");
        }
        args.extend([source.as_str(), destination.as_str()]);
        info!(%source, %destination, incremental, "backing up");
        cmd::run_streaming("rdiff-backup", &args, lines).await
    }

    async fn run_script(&self, script: &str, lines: LineFn<'_>) -> Result<(), ToolError> {
        cmd::run_streaming("sh", &["-c", script], lines).await
    }

    async fn print_document(&self, document: &Path) -> Result<(), ToolError> {
        let document = document.to_string_lossy().to_string();
        cmd::run("lp", &[document.as_str()]).await?;
        Ok(())
    }

    async fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> Result<(), ToolError> {
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || chown_tree(&target, Uid::from_raw(uid), Gid::from_raw(gid)))
            .await
            .map_err(|error| ToolError::other(format!("chown task failed: {error}")))?
            .map_err(|error| ToolError::io(format!("chown {}", path.display()), error))
    }
}
