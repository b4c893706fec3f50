// SPDX-License-Identifier: GPL-3.0-only

//! Upgrade of installed devices to a new system version
//!
//! User data on the persistence partition survives an upgrade; system level
//! changes are discarded except for the categories the configuration keeps.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use livecopy_contracts::{MountAccess, ProgressReporter};
use livecopy_types::{
    ExchangeFilesystem, MIB, OperationMode, PartitionRole, RepartitionPlan, RepartitionStrategy,
    StorageDevice, UpgradeConfig, bytes_to_mib, enlarged_system_size,
};

use crate::batch::{BatchContext, BatchOutcome, DeviceWorkflow, run_batch};
use crate::data_partition::{self, USER_HOME, UPPER_DIR};
use crate::error::{Result, ValidationError};
use crate::fs_tasks::{TreeCopy, blocking, copy_tree_reporting, report_output};
use crate::mount_stack::MountStack;
use crate::prober::measure_used_space;
use crate::session::Session;
use crate::source::SystemSource;
use crate::workflow::{
    copy_system, missing, mount_data, reject_boot_devices, released, step, unmount_device,
};

pub struct Upgrader {
    session: Arc<Session>,
    source: Arc<SystemSource>,
    config: UpgradeConfig,
}

/// Per-device directory below the backup destination.
pub fn backup_directory(destination: &Path, device: &StorageDevice) -> PathBuf {
    let serial = device.serial.trim();
    if serial.is_empty() {
        destination.join(&device.device)
    } else {
        destination.join(serial)
    }
}

fn used_mib(used: Option<u64>) -> u64 {
    used.map_or(0, |bytes| bytes.div_ceil(MIB))
}

impl Upgrader {
    pub fn new(session: Arc<Session>, source: Arc<SystemSource>, config: UpgradeConfig) -> Self {
        Self {
            session,
            source,
            config,
        }
    }

    fn passphrase(&self) -> Option<&str> {
        self.config.encryption_passphrase.as_deref()
    }

    fn preserves_data(&self) -> bool {
        self.config.backup.is_some()
            || self.config.reactivate_welcome
            || !self.config.overwrite_entries.is_empty()
            || (!self.config.reset_data && !self.config.kept_categories().is_empty())
    }

    /// New exchange/data split for devices whose exchange partition changes.
    async fn plan(&self, device: &StorageDevice) -> Result<Option<RepartitionPlan>> {
        let target_mib = match self.config.repartition {
            RepartitionStrategy::Keep => return Ok(None),
            RepartitionStrategy::RemoveExchange => 0,
            RepartitionStrategy::ResizeExchange { size_mib } => size_mib,
        };
        let exchange = device
            .exchange_partition()
            .ok_or_else(|| missing(device, PartitionRole::Exchange))?;
        let data = device
            .data_partition()
            .ok_or_else(|| missing(device, PartitionRole::Data))?;
        if data.is_encrypted() {
            return Err(ValidationError::Unsupported {
                device: device.path(),
                reason: "an encrypted data partition cannot be resized".to_string(),
            }
            .into());
        }

        let tools = self.session.tools.as_ref();
        let exchange_used = if target_mib == 0 {
            0
        } else {
            used_mib(measure_used_space(tools, exchange).await?)
        };
        let data_used = used_mib(measure_used_space(tools, data).await?);
        let plan = RepartitionPlan::compute(
            bytes_to_mib(exchange.size),
            bytes_to_mib(data.size),
            target_mib,
            exchange_used,
            data_used,
        )
        .map_err(|source| ValidationError::Size {
            device: device.path(),
            source,
        })?;
        Ok(Some(plan))
    }

    pub async fn validate(&self, devices: &[StorageDevice]) -> Result<()> {
        if devices.is_empty() {
            return Err(ValidationError::NoDevices.into());
        }
        if let Some(backup) = &self.config.backup
            && backup.destination.as_os_str().is_empty()
        {
            return Err(ValidationError::BackupDestinationMissing.into());
        }

        let required_mib = enlarged_system_size(self.source.system_size());
        for device in devices {
            let system = device
                .system_partition()
                .ok_or_else(|| missing(device, PartitionRole::System))?;
            if device.efi_partition().is_none() {
                return Err(missing(device, PartitionRole::Efi));
            }
            let available_mib = bytes_to_mib(system.size);
            if available_mib < required_mib {
                return Err(ValidationError::SystemPartitionTooSmall {
                    device: device.path(),
                    required_mib,
                    available_mib,
                }
                .into());
            }

            match device.data_partition() {
                None if self.preserves_data() => {
                    return Err(missing(device, PartitionRole::Data));
                }
                Some(data)
                    if data.is_encrypted()
                        && self.passphrase().is_none_or(str::is_empty) =>
                {
                    return Err(ValidationError::PassphraseRequired.into());
                }
                _ => {}
            }
            self.plan(device).await?;
        }
        reject_boot_devices(self.session.tools.as_ref(), devices).await
    }

    pub async fn run(&self, devices: Vec<StorageDevice>, context: &BatchContext) -> Result<BatchOutcome> {
        self.validate(&devices).await?;
        let mut workflow = UpgradeWorkflow { upgrader: self };
        Ok(run_batch(
            &self.session.coordinator,
            OperationMode::Upgrade,
            &devices,
            &mut workflow,
            context,
        )
        .await)
    }
}

struct UpgradeWorkflow<'a> {
    upgrader: &'a Upgrader,
}

impl UpgradeWorkflow<'_> {
    fn session(&self) -> &Session {
        &self.upgrader.session
    }

    fn config(&self) -> &UpgradeConfig {
        &self.upgrader.config
    }

    async fn backup(&self, device: &StorageDevice, reporter: &dyn ProgressReporter) -> Result<()> {
        let Some(backup) = &self.config().backup else {
            return Ok(());
        };
        let data = device
            .data_partition()
            .ok_or_else(|| missing(device, PartitionRole::Data))?;
        step(reporter, device, "Backing up user data");

        let destination = backup_directory(&backup.destination, device);
        let mut mounts = self.session().mount_stack();
        let result: Result<()> = async {
            let data_root = mount_data(&mut mounts, data, self.upgrader.passphrase()).await?;
            let home = data_root.join(UPPER_DIR).join(USER_HOME);
            if !home.is_dir() {
                debug!(home = %home.display(), "no user home to back up");
                return Ok(());
            }
            let target = destination.clone();
            blocking("creating backup directory", move || fs::create_dir_all(&target)).await?;
            self.session()
                .tools
                .backup(&home, &destination, backup.incremental, &|line: &str| {
                    report_output(reporter, line)
                })
                .await?;
            Ok(())
        }
        .await;
        released(&mut mounts, result).await
    }

    async fn repartition(&self, device: &StorageDevice, reporter: &dyn ProgressReporter) -> Result<()> {
        let Some(plan) = self.upgrader.plan(device).await? else {
            return Ok(());
        };
        let exchange = device
            .exchange_partition()
            .ok_or_else(|| missing(device, PartitionRole::Exchange))?;
        let staging = self.config().work_dir.join(&device.device).join("exchange");

        if !plan.removes_exchange() {
            step(reporter, device, "Saving exchange partition files");
            let mut mounts = self.session().mount_stack();
            let result = async {
                let root = mounts.mount(&exchange.path(), MountAccess::ReadOnly).await?;
                copy_tree_reporting(root, staging.clone(), TreeCopy::default(), reporter).await
            }
            .await;
            released(&mut mounts, result).await?;
        }

        step(reporter, device, "Repartitioning");
        self.session().tools.repartition(device, &plan).await?;
        if plan.removes_exchange() {
            return Ok(());
        }

        step(reporter, device, "Restoring exchange partition files");
        let filesystem = ExchangeFilesystem::from_fs_type(&exchange.id_type).unwrap_or_default();
        self.session()
            .tools
            .format(&exchange.path(), filesystem.fs_type(), &exchange.id_label)
            .await?;
        let mut mounts = self.session().mount_stack();
        let result = async {
            let root = mounts.mount(&exchange.path(), MountAccess::ReadWrite).await?;
            copy_tree_reporting(staging.clone(), root, TreeCopy::default(), reporter).await
        }
        .await;
        released(&mut mounts, result).await?;

        let staged = staging.clone();
        blocking("removing staged exchange files", move || fs::remove_dir_all(&staged)).await
    }

    async fn update(
        &self,
        device: &StorageDevice,
        mounts: &mut MountStack,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let session = self.session();
        let config = self.config();
        let efi_partition = device
            .efi_partition()
            .ok_or_else(|| missing(device, PartitionRole::Efi))?;
        let system_partition = device
            .system_partition()
            .ok_or_else(|| missing(device, PartitionRole::System))?;

        let data_root = match device.data_partition() {
            Some(data) => Some((
                mount_data(mounts, data, self.upgrader.passphrase()).await?,
                data.is_encrypted(),
            )),
            None => None,
        };

        if let Some((root, _)) = &data_root {
            let root = root.clone();
            if config.reset_data {
                step(reporter, device, "Resetting data partition");
                blocking("resetting data partition", move || {
                    data_partition::clear_all(&root)?;
                    data_partition::prepare_layout(&root)
                })
                .await?;
            } else {
                step(reporter, device, "Discarding system changes");
                let keep: Vec<&'static str> = config
                    .kept_categories()
                    .into_iter()
                    .map(|category| category.subtree())
                    .collect();
                let always_overwrite = config.always_overwrite.clone();
                let removed = blocking("discarding system changes", move || {
                    data_partition::discard_system_changes(&root, &keep, &always_overwrite)
                })
                .await?;
                debug!(removed, "system changes discarded");
            }
        }

        step(reporter, device, "Updating system files");
        let efi = mounts.mount(&efi_partition.path(), MountAccess::ReadWrite).await?;
        let system = mounts
            .mount(&system_partition.path(), MountAccess::ReadWrite)
            .await?;
        copy_system(&self.upgrader.source, &efi, &system, &session.digests, true, reporter).await?;

        let Some((root, encrypted)) = data_root else {
            return Ok(());
        };
        if encrypted {
            for boot_root in [efi, system] {
                blocking("marking boot configuration", move || {
                    data_partition::mark_boot_configs_encrypted(&boot_root)
                })
                .await?;
            }
        }
        if config.reactivate_welcome {
            step(reporter, device, "Reactivating welcome application");
            let root = root.clone();
            blocking("reactivating welcome application", move || {
                data_partition::reactivate_welcome(&root)
            })
            .await?;
        }
        if !config.overwrite_entries.is_empty() {
            step(reporter, device, "Restoring overwrite entries");
            let entries = config.overwrite_entries.clone();
            blocking("restoring overwrite entries", move || {
                for entry in &entries {
                    data_partition::restore_entry(&root, &entry.source, &entry.destination)?;
                }
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    async fn install_bootloader(&self, device: &StorageDevice) -> Result<()> {
        let efi = device
            .efi_partition()
            .ok_or_else(|| missing(device, PartitionRole::Efi))?;
        let mut mounts = self.session().mount_stack();
        let result: Result<()> = async {
            let mount_point = mounts.mount(&efi.path(), MountAccess::ReadWrite).await?;
            self.session()
                .tools
                .install_bootloader(&device.path(), &mount_point)
                .await?;
            Ok(())
        }
        .await;
        released(&mut mounts, result).await
    }

    async fn delete_backup(&self, device: &StorageDevice) -> Result<()> {
        let Some(backup) = &self.config().backup else {
            return Ok(());
        };
        if !backup.delete_after_upgrade {
            return Ok(());
        }
        let directory = backup_directory(&backup.destination, device);
        info!(directory = %directory.display(), "deleting backup");
        blocking("deleting backup", move || match fs::remove_dir_all(&directory) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        })
        .await
    }
}

#[async_trait]
impl DeviceWorkflow for UpgradeWorkflow<'_> {
    async fn run_device(
        &mut self,
        device: &StorageDevice,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        info!(device = %device.path(), version = self.upgrader.source.version(), "upgrading");
        step(reporter, device, "Unmounting partitions");
        unmount_device(self.session().tools.as_ref(), device).await?;

        self.backup(device, reporter).await?;
        self.repartition(device, reporter).await?;

        let mut mounts = self.session().mount_stack();
        let result = self.update(device, &mut mounts, reporter).await;
        step(reporter, device, "Unmounting partitions");
        released(&mut mounts, result).await?;

        step(reporter, device, "Installing bootloader");
        self.install_bootloader(device).await?;

        if let Err(error) = self.delete_backup(device).await {
            warn!(device = %device.path(), %error, "backup could not be deleted");
            return Err(error);
        }
        Ok(())
    }
}
