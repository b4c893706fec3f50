// SPDX-License-Identifier: GPL-3.0-only

//! Storage device data model
//!
//! A [`StorageDevice`] is the unit the registry lists and the orchestrators
//! provision. Identity is the device path; ordering follows the path so that
//! sorted insertion is deterministic.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::partition::{Partition, PartitionRole};

/// Kind of storage device, used for list filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    UsbFlashDrive,
    HardDrive,
    OpticalDisc,
    Raid,
    Unknown,
}

/// RAID metadata for md devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidInfo {
    /// RAID level (e.g., "raid1")
    pub level: String,

    /// Number of member devices
    pub member_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDevice {
    // === Identity ===
    /// Kernel device name (e.g., "sdb")
    pub device: String,

    pub device_type: DeviceType,

    pub vendor: String,

    pub model: String,

    pub serial: String,

    /// Firmware revision
    pub revision: String,

    // === Physical Properties ===
    /// Total size in bytes
    pub size: u64,

    pub removable: bool,

    pub raid: Option<RaidInfo>,

    /// Partitions in partition-number order
    pub partitions: Vec<Partition>,
}

impl StorageDevice {
    /// Device path (e.g., "/dev/sdb")
    pub fn path(&self) -> String {
        format!("/dev/{}", self.device)
    }

    /// Kernel name of partition `number` of this device.
    pub fn partition_name(&self, number: u32) -> String {
        partition_device_name(&self.device, number)
    }

    pub fn partition_path(&self, number: u32) -> String {
        format!("/dev/{}", self.partition_name(number))
    }

    pub fn partition(&self, role: PartitionRole) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.role == role)
    }

    pub fn efi_partition(&self) -> Option<&Partition> {
        self.partition(PartitionRole::Efi)
    }

    pub fn exchange_partition(&self) -> Option<&Partition> {
        self.partition(PartitionRole::Exchange)
    }

    pub fn data_partition(&self) -> Option<&Partition> {
        self.partition(PartitionRole::Data)
    }

    pub fn system_partition(&self) -> Option<&Partition> {
        self.partition(PartitionRole::System)
    }

    /// Whether a live system appears to be installed on this device.
    pub fn has_installed_system(&self) -> bool {
        self.system_partition().is_some()
    }

    /// Get a human-readable display name for the device
    pub fn display_name(&self) -> String {
        let name = match (self.vendor.trim(), self.model.trim()) {
            ("", "") => String::new(),
            ("", model) => model.to_string(),
            (vendor, "") => vendor.to_string(),
            (vendor, model) => format!("{vendor} {model}"),
        };

        if name.is_empty() {
            self.path()
        } else {
            format!("{name} ({})", self.path())
        }
    }
}

/// Partition naming follows the kernel: a "p" separator is inserted when the
/// device name ends in a digit (nvme0n1p1, mmcblk0p1, md0p1).
pub fn partition_device_name(device: &str, number: u32) -> String {
    if device.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        format!("{device}p{number}")
    } else {
        format!("{device}{number}")
    }
}

impl PartialEq for StorageDevice {
    fn eq(&self, other: &Self) -> bool {
        self.device == other.device
    }
}

impl Eq for StorageDevice {}

impl PartialOrd for StorageDevice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageDevice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.device.cmp(&other.device)
    }
}

impl fmt::Display for StorageDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.display_name(),
            crate::bytes_to_pretty(&self.size, false)
        )
    }
}
