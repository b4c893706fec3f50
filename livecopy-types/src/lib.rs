// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for livecopy provisioning
//!
//! This crate defines the single source of truth for the data every layer of
//! the stack exchanges:
//!
//! - **livecopy-sys**: builds [`StorageDevice`] descriptors from the host
//! - **livecopy-core**: drives install/upgrade/reset workflows over them
//! - **livecopy-cli**: loads the configuration value objects from TOML and
//!   renders [`StorageDeviceResult`] tables
//!
//! The partition size calculator lives here as well because it is a pure
//! function of device geometry and is shared by validation, the prober and the
//! presentation layer.

pub mod common;
pub mod device;
pub mod mode;
pub mod mount;
pub mod options;
pub mod partition;
pub mod result;
pub mod sizes;

pub use common::{MIB, bytes_to_mib, bytes_to_pretty, mib_to_bytes};
pub use device::{DeviceType, RaidInfo, StorageDevice, partition_device_name};
pub use mode::OperationMode;
pub use mount::MountEntry;
pub use options::{
    AutoNumbering, DataFilesystem, DataPartitionReset, DocumentPrinting, EncryptionOptions,
    ExchangeFilesystem, InstallConfig, OverwriteEntry, PrintMode, RepartitionStrategy, ResetConfig,
    Subdirectory, SubdirectoryKind, TransferCategory, TransferOptions, UpgradeBackup,
    UpgradeConfig,
};
pub use partition::{Partition, PartitionRole};
pub use result::StorageDeviceResult;
pub use sizes::{
    EFI_PARTITION_SIZE_MIB, MINIMUM_EXCHANGE_SIZE_MIB, PartitionLayout, PartitionSizes,
    PartitionSpec, PartitionState, RepartitionPlan, SYSTEM_SIZE_FACTOR, SizeError,
    calculate, enlarged_system_size, max_exchange_size, overhead, partition_state,
};
