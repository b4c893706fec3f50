// SPDX-License-Identifier: GPL-3.0-only

//! Host tool seam
//!
//! Everything the orchestrators do to a block device goes through
//! [`SystemTools`]: partitioning, formatting, mounting, encryption, bootloader
//! installation, backups and printing. Mount operations choose their own
//! mount point and return it; the caller only ever unmounts what it mounted.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use livecopy_types::{MountEntry, PartitionLayout, RepartitionPlan, StorageDevice};

use crate::ToolError;

/// Receives percentage progress (0..=100) of a long-running tool.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Receives every output line of a tool or script.
pub type LineFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAccess {
    ReadOnly,
    ReadWrite,
}

/// Size and usage of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsUsage {
    pub total: u64,
    pub used: u64,
}

#[async_trait]
pub trait SystemTools: Send + Sync {
    /// Write a fresh partition table to `device` (e.g. "/dev/sdb").
    async fn create_partitions(
        &self,
        device: &str,
        layout: &PartitionLayout,
    ) -> Result<(), ToolError>;

    /// Move and resize the exchange and data partitions of an installed device.
    async fn repartition(
        &self,
        device: &StorageDevice,
        plan: &RepartitionPlan,
    ) -> Result<(), ToolError>;

    async fn format(&self, partition: &str, fs_type: &str, label: &str)
    -> Result<(), ToolError>;

    async fn overwrite_random(
        &self,
        partition: &str,
        size: u64,
        progress: ProgressFn<'_>,
    ) -> Result<(), ToolError>;

    /// LUKS-format `partition`, one key slot per passphrase.
    async fn luks_format(&self, partition: &str, passphrases: &[String])
    -> Result<(), ToolError>;

    /// Open a LUKS container as `/dev/mapper/<name>` and return that path.
    async fn luks_open(
        &self,
        partition: &str,
        passphrase: &str,
        name: &str,
    ) -> Result<String, ToolError>;

    async fn luks_close(&self, name: &str) -> Result<(), ToolError>;

    async fn mount(&self, source: &str, access: MountAccess) -> Result<PathBuf, ToolError>;

    /// Loop-mount a filesystem image read-only.
    async fn mount_loop(&self, image: &Path) -> Result<PathBuf, ToolError>;

    /// Stack an overlay of `lower` (top-most first) under `upper`.
    async fn mount_overlay(
        &self,
        lower: &[PathBuf],
        upper: &Path,
        work: &Path,
    ) -> Result<PathBuf, ToolError>;

    async fn unmount(&self, mount_point: &Path) -> Result<(), ToolError>;

    async fn active_mounts(&self) -> Result<Vec<MountEntry>, ToolError>;

    async fn filesystem_usage(&self, mount_point: &Path) -> Result<FsUsage, ToolError>;

    /// Install the bootloader of `device` into its mounted EFI partition.
    async fn install_bootloader(&self, device: &str, efi: &Path) -> Result<(), ToolError>;

    /// Back up `source` into `destination`. An incremental backup adds an
    /// increment to an existing backup there.
    async fn backup(
        &self,
        source: &Path,
        destination: &Path,
        incremental: bool,
        lines: LineFn<'_>,
    ) -> Result<(), ToolError>;

    /// Run a shell script, forwarding its output line by line.
    async fn run_script(&self, script: &str, lines: LineFn<'_>) -> Result<(), ToolError>;

    async fn print_document(&self, document: &Path) -> Result<(), ToolError>;

    async fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> Result<(), ToolError>;
}
