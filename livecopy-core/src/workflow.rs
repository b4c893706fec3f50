// SPDX-License-Identifier: GPL-3.0-only

//! Steps shared by the install, upgrade and reset workflows

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use livecopy_contracts::{MountAccess, ProgressReporter, SystemTools};
use livecopy_sys::{DigestCache, device_mounts, is_boot_device};
use livecopy_types::{Partition, PartitionRole, StorageDevice};

use crate::error::{LiveCopyError, Result, ValidationError};
use crate::fs_tasks::{TreeCopy, copy_tree_reporting};
use crate::mount_stack::MountStack;
use crate::source::{EFI_ENTRIES, SystemSource};

/// Log a step and show it to the user.
pub fn step(reporter: &dyn ProgressReporter, device: &StorageDevice, text: &str) {
    info!(device = %device.path(), "{text}");
    reporter.step(text);
}

/// Device mapper name used while a data partition is open.
pub fn mapper_name(partition: &Partition) -> String {
    format!("livecopy-{}", partition.device_and_number)
}

/// Refuse devices the running system booted from.
pub async fn reject_boot_devices(
    tools: &dyn SystemTools,
    devices: &[StorageDevice],
) -> Result<()> {
    let mounts = tools.active_mounts().await?;
    for device in devices {
        if is_boot_device(&mounts, &device.device) {
            return Err(ValidationError::Unsupported {
                device: device.path(),
                reason: "it is the running boot device".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Unmount every mounted partition of `device`, innermost first.
pub async fn unmount_device(tools: &dyn SystemTools, device: &StorageDevice) -> Result<usize> {
    let mounts = device_mounts(&tools.active_mounts().await?, &device.device);
    for entry in &mounts {
        debug!(source = %entry.source, mount_point = %entry.mount_point.display(), "unmounting");
        tools.unmount(&entry.mount_point).await?;
    }
    Ok(mounts.len())
}

/// Mount a data partition read-write, opening its LUKS container first when
/// it is encrypted.
pub async fn mount_data(
    mounts: &mut MountStack,
    partition: &Partition,
    passphrase: Option<&str>,
) -> Result<PathBuf> {
    let source = if partition.is_encrypted() {
        let passphrase = passphrase
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError::PassphraseRequired)?;
        mounts
            .open_luks(&partition.path(), passphrase, &mapper_name(partition))
            .await?
    } else {
        partition.path()
    };
    Ok(mounts.mount(&source, MountAccess::ReadWrite).await?)
}

/// Copy the EFI and system content of `source` onto mounted partitions.
///
/// A fresh copy verifies every file; an update skips identical files and
/// removes files the new system no longer has.
pub async fn copy_system(
    source: &SystemSource,
    efi: &Path,
    system: &Path,
    digests: &Arc<DigestCache>,
    update: bool,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let copy = if update {
        TreeCopy::update(digests.clone())
    } else {
        TreeCopy::verified(digests.clone())
    };

    for entry in EFI_ENTRIES {
        let from = source.root().join(entry);
        if from.is_dir() {
            copy_tree_reporting(from, efi.join(entry), copy.clone(), reporter).await?;
        }
    }
    copy_tree_reporting(
        source.root().to_path_buf(),
        system.to_path_buf(),
        copy.excluding(&EFI_ENTRIES),
        reporter,
    )
    .await?;
    Ok(())
}

/// Release `mounts` after a step ran, whatever the step returned. A failure
/// of the step takes precedence over a release failure.
pub async fn released<T>(mounts: &mut MountStack, result: Result<T>) -> Result<T> {
    let release = mounts.release_all().await;
    let value = result?;
    release?;
    Ok(value)
}

pub(crate) fn missing(device: &StorageDevice, role: PartitionRole) -> LiveCopyError {
    ValidationError::MissingPartition {
        device: device.path(),
        role,
    }
    .into()
}
