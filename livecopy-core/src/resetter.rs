// SPDX-License-Identifier: GPL-3.0-only

//! Reset of installed devices to a clean state
//!
//! Typically run for a whole class of sticks at once: pending documents are
//! printed, the exchange partition is backed up and reformatted, and the
//! data partition is formatted or selectively cleared.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info, warn};

use livecopy_contracts::{MountAccess, ProgressReporter};
use livecopy_sys::is_boot_device;
use livecopy_types::{
    DataFilesystem, DataPartitionReset, OperationMode, Partition, PartitionRole, PrintMode,
    ResetConfig, StorageDevice, SubdirectoryKind, partition::DATA_LABEL,
};

use crate::batch::{BatchContext, BatchOutcome, DeviceWorkflow, run_batch};
use crate::data_partition::{self, UPPER_DIR};
use crate::documents::find_documents;
use crate::error::{LiveCopyError, Result, ValidationError};
use crate::fs_tasks::{TreeCopy, blocking, copy_tree_reporting};
use crate::mount_stack::MountStack;
use crate::session::Session;
use crate::workflow::{mapper_name, missing, mount_data, released, step, unmount_device};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub struct Resetter {
    session: Arc<Session>,
    config: ResetConfig,
}

fn path_component(value: &str) -> String {
    value.trim().replace('/', "_")
}

/// Backup directory of one exchange partition, built from the enabled
/// subdirectory components in their configured order.
pub fn backup_directory(
    config: &ResetConfig,
    device: &StorageDevice,
    exchange: &Partition,
    timestamp: &str,
) -> PathBuf {
    let mut directory = config.backup_destination.clone();
    for subdirectory in config.backup_subdirectories.iter().filter(|s| s.enabled) {
        let component = match subdirectory.kind {
            SubdirectoryKind::ExchangePartitionLabel => match path_component(&exchange.id_label) {
                label if label.is_empty() => "exchange".to_string(),
                label => label,
            },
            SubdirectoryKind::StorageMediaSerialNumber => match path_component(&device.serial) {
                serial if serial.is_empty() => device.device.clone(),
                serial => serial,
            },
            SubdirectoryKind::Timestamp => timestamp.to_string(),
        };
        directory.push(component);
    }
    directory
}

/// Filesystem a formatted data partition gets: the current one when it is
/// an ext filesystem, ext4 otherwise.
fn data_filesystem(partition: &Partition) -> DataFilesystem {
    match partition.id_type.as_str() {
        "ext2" => DataFilesystem::Ext2,
        "ext3" => DataFilesystem::Ext3,
        _ => DataFilesystem::Ext4,
    }
}

/// The running system keeps its partitions mounted, so they are never
/// formatted. The rest of the reset goes ahead.
fn refuse_on_boot_device(device: &StorageDevice, skipped: &str, reporter: &dyn ProgressReporter) {
    warn!(device = %device.path(), skipped, "device runs the current system");
    reporter.show_error(&format!(
        "{} runs the current system: {skipped}",
        device.path()
    ));
}

impl Resetter {
    pub fn new(session: Arc<Session>, config: ResetConfig) -> Self {
        Self { session, config }
    }

    fn passphrase(&self) -> Option<&str> {
        self.config.encryption_passphrase.as_deref()
    }

    fn needs_exchange(&self) -> bool {
        self.config.printing.mode != PrintMode::None
            || self.config.backup_exchange
            || self.config.format_exchange
    }

    fn needs_data(&self) -> bool {
        self.config.data != DataPartitionReset::Keep || !self.config.restore.is_empty()
    }

    pub fn validate(&self, devices: &[StorageDevice]) -> Result<()> {
        if devices.is_empty() {
            return Err(ValidationError::NoDevices.into());
        }
        if self.config.backup_exchange && self.config.backup_destination.as_os_str().is_empty() {
            return Err(ValidationError::BackupDestinationMissing.into());
        }
        for device in devices {
            if self.needs_exchange() && device.exchange_partition().is_none() {
                return Err(missing(device, PartitionRole::Exchange));
            }
            if !self.needs_data() {
                continue;
            }
            let data = device
                .data_partition()
                .ok_or_else(|| missing(device, PartitionRole::Data))?;
            if data.is_encrypted() && self.passphrase().is_none_or(str::is_empty) {
                return Err(ValidationError::PassphraseRequired.into());
            }
        }
        Ok(())
    }

    pub async fn run(&self, devices: Vec<StorageDevice>, context: &BatchContext) -> Result<BatchOutcome> {
        self.validate(&devices)?;
        let mut workflow = ResetWorkflow { resetter: self };
        Ok(run_batch(
            &self.session.coordinator,
            OperationMode::Reset,
            &devices,
            &mut workflow,
            context,
        )
        .await)
    }
}

struct ResetWorkflow<'a> {
    resetter: &'a Resetter,
}

impl ResetWorkflow<'_> {
    fn session(&self) -> &Session {
        &self.resetter.session
    }

    fn config(&self) -> &ResetConfig {
        &self.resetter.config
    }

    async fn print_documents(
        &self,
        exchange_root: &Path,
        device: &StorageDevice,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let printing = &self.config().printing;
        if printing.mode == PrintMode::None {
            return Ok(());
        }
        step(reporter, device, "Looking for documents to print");
        let root = exchange_root.to_path_buf();
        let settings = printing.clone();
        let found = tokio::task::spawn_blocking(move || find_documents(&root, &settings))
            .await
            .map_err(|e| LiveCopyError::Task(e.to_string()))?;
        let documents = match found {
            Ok(documents) => documents,
            Err(error) => {
                warn!(device = %device.path(), %error, "document discovery failed");
                reporter.show_error(&error.to_string());
                return Ok(());
            }
        };

        let selected = match printing.mode {
            PrintMode::Interactive => reporter.select_documents(&documents),
            _ => documents,
        };
        for document in &selected {
            reporter.line(&document.display().to_string());
            self.session().tools.print_document(document).await?;
        }
        info!(device = %device.path(), printed = selected.len(), "documents printed");
        Ok(())
    }

    async fn exchange(
        &self,
        device: &StorageDevice,
        boot_device: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let Some(exchange) = device.exchange_partition() else {
            return Ok(());
        };
        let config = self.config();
        if config.printing.mode == PrintMode::None && !config.backup_exchange {
            return Ok(());
        }

        let mut mounts = self.session().mount_stack();
        let result: Result<()> = async {
            let root = mounts.mount(&exchange.path(), MountAccess::ReadOnly).await?;
            self.print_documents(&root, device, reporter).await?;
            if config.backup_exchange {
                step(reporter, device, "Backing up exchange partition");
                let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
                let destination = backup_directory(config, device, exchange, &timestamp);
                info!(destination = %destination.display(), "exchange backup");
                copy_tree_reporting(root, destination, TreeCopy::default(), reporter).await?;
            }
            Ok(())
        }
        .await;
        released(&mut mounts, result).await?;

        if config.format_exchange && boot_device {
            refuse_on_boot_device(device, "exchange partition not formatted", reporter);
        } else if config.format_exchange {
            step(reporter, device, "Formatting exchange partition");
            let label = if config.keep_exchange_label {
                exchange.id_label.clone()
            } else {
                config.new_exchange_label.clone()
            };
            let label = config.exchange_filesystem.fit_label(&label);
            self.session()
                .tools
                .format(&exchange.path(), config.exchange_filesystem.fs_type(), label)
                .await?;
        }
        Ok(())
    }

    async fn seed_home(&self, root: &Path) -> Result<()> {
        let config = self.config();
        let root = root.to_path_buf();
        let skeleton = config.skeleton_dir.clone();
        let home = blocking("seeding home directory", move || {
            data_partition::seed_home(&root, &skeleton)
        })
        .await?;
        self.session()
            .tools
            .chown_recursive(&home, config.user_uid, config.user_gid)
            .await?;
        Ok(())
    }

    /// Format the data partition and return its mount point.
    async fn format_data(
        &self,
        data: &Partition,
        mounts: &mut MountStack,
    ) -> Result<PathBuf> {
        let target = if data.is_encrypted() {
            let passphrase = self
                .resetter
                .passphrase()
                .ok_or(ValidationError::PassphraseRequired)?;
            mounts
                .open_luks(&data.path(), passphrase, &mapper_name(data))
                .await?
        } else {
            data.path()
        };
        self.session()
            .tools
            .format(&target, data_filesystem(data).fs_type(), DATA_LABEL)
            .await?;
        let root = mounts.mount(&target, MountAccess::ReadWrite).await?;

        let config_root = root.clone();
        blocking("writing persistence configuration", move || {
            data_partition::write_config(&config_root)
        })
        .await?;
        self.seed_home(&root).await?;
        Ok(root)
    }

    async fn data(
        &self,
        device: &StorageDevice,
        boot_device: bool,
        mounts: &mut MountStack,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let config = self.config();
        let Some(data) = device.data_partition() else {
            return Ok(());
        };
        let mode = match config.data {
            DataPartitionReset::Format | DataPartitionReset::Clear { .. } if boot_device => {
                refuse_on_boot_device(device, "data partition left unchanged", reporter);
                DataPartitionReset::Keep
            }
            mode => mode,
        };
        let root = match mode {
            DataPartitionReset::Keep if config.restore.is_empty() => return Ok(()),
            DataPartitionReset::Keep => mount_data(mounts, data, self.resetter.passphrase()).await?,
            DataPartitionReset::Format => {
                step(reporter, device, "Formatting data partition");
                self.format_data(data, mounts).await?
            }
            DataPartitionReset::Clear { system, home } => {
                step(reporter, device, "Clearing data partition");
                let root = mount_data(mounts, data, self.resetter.passphrase()).await?;
                let cleared = root.clone();
                let removed = blocking("clearing data partition", move || {
                    data_partition::clear(&cleared, system, home)
                })
                .await?;
                debug!(removed, "data partition cleared");
                if home {
                    self.seed_home(&root).await?;
                }
                root
            }
        };

        if config.restore.is_empty() {
            return Ok(());
        }
        step(reporter, device, "Restoring files");
        for entry in &config.restore {
            let (target_root, source, destination) =
                (root.clone(), entry.source.clone(), entry.destination.clone());
            let restored = blocking(format!("restoring {}", entry.source.display()), move || {
                data_partition::restore_entry(&target_root, &source, &destination)
            })
            .await?;
            self.session()
                .tools
                .chown_recursive(&restored, config.user_uid, config.user_gid)
                .await?;
        }
        debug!(upper = %root.join(UPPER_DIR).display(), "files restored");
        Ok(())
    }
}

#[async_trait]
impl DeviceWorkflow for ResetWorkflow<'_> {
    async fn run_device(
        &mut self,
        device: &StorageDevice,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let tools = self.session().tools.as_ref();
        let boot_device = is_boot_device(&tools.active_mounts().await?, &device.device);
        info!(device = %device.path(), boot_device, "resetting");
        if !boot_device {
            unmount_device(tools, device).await?;
        }

        self.exchange(device, boot_device, reporter).await?;

        let mut mounts = self.session().mount_stack();
        let result = self.data(device, boot_device, &mut mounts, reporter).await;
        released(&mut mounts, result).await?;

        if !boot_device {
            step(reporter, device, "Unmounting partitions");
            unmount_device(tools, device).await?;
        }
        Ok(())
    }
}
