// SPDX-License-Identifier: GPL-3.0-only

//! Fresh installation of the live system onto blank devices

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use livecopy_contracts::{MountAccess, ProgressReporter};
use livecopy_types::{
    InstallConfig, OperationMode, PartitionLayout, PartitionRole, StorageDevice, calculate,
    enlarged_system_size, mib_to_bytes,
    partition::{DATA_LABEL, EFI_LABEL, SYSTEM_LABEL},
};

use crate::batch::{BatchContext, BatchOutcome, DeviceWorkflow, run_batch};
use crate::data_partition;
use crate::error::{Result, ValidationError};
use crate::fs_tasks::{TreeCopy, blocking, copy_tree_reporting};
use crate::hotplug::device_name;
use crate::mount_stack::MountStack;
use crate::session::Session;
use crate::source::SystemSource;
use crate::transfer;
use crate::workflow::{copy_system, reject_boot_devices, released, step, unmount_device};

pub struct Installer {
    session: Arc<Session>,
    source: Arc<SystemSource>,
    config: InstallConfig,
}

/// Partition device paths of one freshly partitioned device.
struct Targets {
    efi: String,
    exchange: Option<String>,
    data: Option<(String, u64)>,
    system: String,
}

impl Targets {
    fn new(device: &StorageDevice, layout: &PartitionLayout) -> Option<Self> {
        let path = |role| layout.number_of(role).map(|n| device.partition_path(n));
        Some(Self {
            efi: path(PartitionRole::Efi)?,
            exchange: path(PartitionRole::Exchange),
            data: layout
                .spec(PartitionRole::Data)
                .map(|spec| (device.partition_path(spec.number), mib_to_bytes(spec.size_mib))),
            system: path(PartitionRole::System)?,
        })
    }
}

impl Installer {
    pub fn new(session: Arc<Session>, source: Arc<SystemSource>, config: InstallConfig) -> Self {
        Self {
            session,
            source,
            config,
        }
    }

    fn enlarged_system_mib(&self) -> u64 {
        enlarged_system_size(self.source.system_size())
    }

    /// Check the whole selection before anything is touched. Returns the
    /// resolved transfer source, if one is configured.
    pub async fn validate(&self, devices: &[StorageDevice]) -> Result<Option<StorageDevice>> {
        if devices.is_empty() {
            return Err(ValidationError::NoDevices.into());
        }
        if self.config.encryption.missing_passphrase() {
            return Err(ValidationError::PassphraseRequired.into());
        }

        let needs_data = self.config.encryption.enabled()
            || self.config.copy_data
            || self.config.transfer.is_active();
        for device in devices {
            let sizes = calculate(
                device.size,
                self.enlarged_system_mib(),
                self.config.exchange_size_mib,
            )
            .map_err(|source| ValidationError::Size {
                device: device.path(),
                source,
            })?;
            if needs_data && !sizes.has_data() {
                return Err(ValidationError::Unsupported {
                    device: device.path(),
                    reason: "no space left for a data partition".to_string(),
                }
                .into());
            }
        }
        reject_boot_devices(self.session.tools.as_ref(), devices).await?;

        if !self.config.transfer.is_active() {
            return Ok(None);
        }
        let source_path = self.config.transfer.source.clone().unwrap_or_default();
        if devices.iter().any(|device| device.path() == source_path) {
            return Err(ValidationError::Unsupported {
                device: source_path,
                reason: "the transfer source is also a target".to_string(),
            }
            .into());
        }
        match self.session.resolver.resolve(device_name(&source_path)).await? {
            Some(source) if source.has_installed_system() && source.data_partition().is_some() => {
                Ok(Some(source))
            }
            _ => Err(ValidationError::TransferSourceMissing(source_path).into()),
        }
    }

    /// Validate, then install onto every device in order.
    pub async fn run(&self, devices: Vec<StorageDevice>, context: &BatchContext) -> Result<BatchOutcome> {
        let transfer_source = self.validate(&devices).await?;
        let mut workflow = InstallWorkflow {
            installer: self,
            transfer_source,
            counter: self.config.auto_numbering.as_ref().map(|n| n.start),
        };
        let mut outcome = run_batch(
            &self.session.coordinator,
            OperationMode::Install,
            &devices,
            &mut workflow,
            context,
        )
        .await;
        outcome.next_auto_number = workflow.counter;
        Ok(outcome)
    }
}

struct InstallWorkflow<'a> {
    installer: &'a Installer,
    transfer_source: Option<StorageDevice>,
    /// Next auto-numbering value, threaded through the batch
    counter: Option<u32>,
}

impl InstallWorkflow<'_> {
    /// Exchange label for the current device; advances the counter.
    fn next_exchange_label(&mut self) -> String {
        let config = &self.installer.config;
        let label = match (&config.auto_numbering, self.counter) {
            (Some(numbering), Some(number)) => {
                self.counter = Some(numbering.next(number));
                numbering.apply(&config.exchange_label, number)
            }
            _ => config.exchange_label.clone(),
        };
        let fitted = config.exchange_filesystem.fit_label(&label);
        if fitted.len() < label.len() {
            debug!(label, fitted, "label shortened");
        }
        fitted.to_string()
    }

    async fn format(
        &self,
        device: &StorageDevice,
        targets: &Targets,
        exchange_label: &str,
        mounts: &mut MountStack,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<String>> {
        let session = &self.installer.session;
        let config = &self.installer.config;
        let tools = session.tools.as_ref();

        let mut data_target = None;
        if let Some((data, size)) = &targets.data {
            if config.overwrite_data_with_random {
                step(reporter, device, "Overwriting data partition with random data");
                tools
                    .overwrite_random(data, *size, &|percent: u8| reporter.progress(percent))
                    .await?;
            }
            data_target = Some(data.clone());
            if config.encryption.enabled() {
                step(reporter, device, "Encrypting data partition");
                let passphrases = config.encryption.passphrases();
                tools.luks_format(data, &passphrases).await?;
                let name = format!("livecopy-{}", device_name(data));
                let first = passphrases.first().map(String::as_str).unwrap_or_default();
                data_target = Some(mounts.open_luks(data, first, &name).await?);
            }
        }

        step(reporter, device, "Creating file systems");
        tools.format(&targets.efi, "vfat", EFI_LABEL).await?;
        if let Some(exchange) = &targets.exchange {
            tools
                .format(exchange, config.exchange_filesystem.fs_type(), exchange_label)
                .await?;
        }
        if let Some(data) = &data_target {
            tools
                .format(data, config.data_filesystem.fs_type(), DATA_LABEL)
                .await?;
        }
        tools.format(&targets.system, "vfat", SYSTEM_LABEL).await?;
        Ok(data_target)
    }

    async fn populate(
        &self,
        device: &StorageDevice,
        targets: &Targets,
        exchange_label: &str,
        mounts: &mut MountStack,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let session = &self.installer.session;
        let source = &self.installer.source;
        let config = &self.installer.config;

        let data_target = self
            .format(device, targets, exchange_label, mounts, reporter)
            .await?;

        step(reporter, device, "Copying system files");
        let efi = mounts.mount(&targets.efi, MountAccess::ReadWrite).await?;
        let system = mounts.mount(&targets.system, MountAccess::ReadWrite).await?;
        copy_system(source, &efi, &system, &session.digests, false, reporter).await?;

        if let (Some(exchange), Some(content)) = (&targets.exchange, source.exchange_dir())
            && config.copy_exchange
        {
            step(reporter, device, "Copying exchange partition content");
            let mount_point = mounts.mount(exchange, MountAccess::ReadWrite).await?;
            copy_tree_reporting(content.to_path_buf(), mount_point, TreeCopy::default(), reporter)
                .await?;
        }

        let Some(data) = data_target else {
            return Ok(());
        };
        let data_root = mounts.mount(&data, MountAccess::ReadWrite).await?;
        if let Some(content) = source.data_dir()
            && config.copy_data
        {
            step(reporter, device, "Copying data partition content");
            copy_tree_reporting(content.to_path_buf(), data_root.clone(), TreeCopy::default(), reporter)
                .await?;
        }
        step(reporter, device, "Preparing data partition");
        let root = data_root.clone();
        blocking("writing persistence layout", move || {
            data_partition::prepare_layout(&root)
        })
        .await?;

        if config.encryption.enabled() {
            for boot_root in [efi, system] {
                let changed = blocking("marking boot configuration", move || {
                    data_partition::mark_boot_configs_encrypted(&boot_root)
                })
                .await?;
                debug!(changed, "boot configurations marked encrypted");
            }
        }

        if let Some(transfer_source) = &self.transfer_source {
            step(reporter, device, "Transferring settings");
            transfer::transfer(
                session,
                transfer_source,
                &config.transfer.categories(),
                &data_root,
                None,
                reporter,
            )
            .await?;
        }
        Ok(())
    }

    async fn install_bootloader(&self, device: &StorageDevice, efi: &str) -> Result<()> {
        let session = &self.installer.session;
        let mut mounts = session.mount_stack();
        let result: Result<()> = async {
            let mount_point = mounts.mount(efi, MountAccess::ReadWrite).await?;
            session
                .tools
                .install_bootloader(&device.path(), &mount_point)
                .await?;
            Ok(())
        }
        .await;
        released(&mut mounts, result).await
    }
}

#[async_trait]
impl DeviceWorkflow for InstallWorkflow<'_> {
    async fn run_device(
        &mut self,
        device: &StorageDevice,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let exchange_label = self.next_exchange_label();
        let session = &self.installer.session;
        let config = &self.installer.config;

        let sizes = calculate(
            device.size,
            self.installer.enlarged_system_mib(),
            config.exchange_size_mib,
        )?;
        let layout = PartitionLayout::from_sizes(&sizes);
        info!(device = %device.path(), ?sizes, exchange_label, "installing");

        step(reporter, device, "Unmounting partitions");
        unmount_device(session.tools.as_ref(), device).await?;

        step(reporter, device, "Creating partitions");
        session.tools.create_partitions(&device.path(), &layout).await?;
        let targets = Targets::new(device, &layout).ok_or_else(|| ValidationError::Unsupported {
            device: device.path(),
            reason: "partition layout lacks EFI or system partition".to_string(),
        })?;

        let mut mounts = session.mount_stack();
        let result = self
            .populate(device, &targets, &exchange_label, &mut mounts, reporter)
            .await;
        step(reporter, device, "Unmounting partitions");
        released(&mut mounts, result).await?;

        step(reporter, device, "Installing bootloader");
        self.install_bootloader(device, &targets.efi).await
    }
}
