// SPDX-License-Identifier: GPL-3.0-only

//! Partition data model

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Label of the EFI/boot partition written by the installer.
pub const EFI_LABEL: &str = "EFI";
/// Label of the data (persistence) partition; live-boot looks for it.
pub const DATA_LABEL: &str = "persistence";
/// Label of the system partition holding the squashfs images.
pub const SYSTEM_LABEL: &str = "system";

/// Role a partition plays in a provisioned live system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    Efi,
    Exchange,
    Data,
    System,
    Other,
}

impl PartitionRole {
    /// Derive the role from filesystem label and type.
    pub fn classify(label: &str, fs_type: &str) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case(EFI_LABEL) || label.eq_ignore_ascii_case("boot") {
            return PartitionRole::Efi;
        }
        if label == DATA_LABEL {
            return PartitionRole::Data;
        }
        if label == SYSTEM_LABEL {
            return PartitionRole::System;
        }
        match fs_type {
            "vfat" | "exfat" | "ntfs" => PartitionRole::Exchange,
            // an encrypted container only exposes its label once opened
            "crypto_LUKS" => PartitionRole::Data,
            _ => PartitionRole::Other,
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionRole::Efi => "EFI",
            PartitionRole::Exchange => "exchange",
            PartitionRole::Data => "data",
            PartitionRole::System => "system",
            PartitionRole::Other => "other",
        };
        f.write_str(name)
    }
}

/// A partition of a [`crate::StorageDevice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    /// Parent device name (e.g., "sdb")
    pub device: String,

    /// Partition number (1-based)
    pub number: u32,

    /// Kernel name of the partition (e.g., "sdb1", "nvme0n1p1")
    pub device_and_number: String,

    /// Byte offset from the start of the device
    pub offset: u64,

    /// Size in bytes
    pub size: u64,

    /// Filesystem type as reported by blkid ("vfat", "ext4", "crypto_LUKS", ...)
    pub id_type: String,

    /// Filesystem label
    pub id_label: String,

    pub role: PartitionRole,

    /// Where the partition is currently mounted, if anywhere
    pub mount_point: Option<PathBuf>,

    /// Used bytes, measured at most once per probe and shared by every clone
    #[serde(skip)]
    used_space: Arc<OnceLock<u64>>,
}

impl Partition {
    pub fn new(
        device: impl Into<String>,
        number: u32,
        device_and_number: impl Into<String>,
        offset: u64,
        size: u64,
        id_type: impl Into<String>,
        id_label: impl Into<String>,
    ) -> Self {
        let id_type = id_type.into();
        let id_label = id_label.into();
        Self {
            device: device.into(),
            number,
            device_and_number: device_and_number.into(),
            offset,
            size,
            role: PartitionRole::classify(&id_label, &id_type),
            id_type,
            id_label,
            mount_point: None,
            used_space: Arc::new(OnceLock::new()),
        }
    }

    /// Full device path, e.g. "/dev/sdb1"
    pub fn path(&self) -> String {
        format!("/dev/{}", self.device_and_number)
    }

    pub fn is_encrypted(&self) -> bool {
        self.id_type == "crypto_LUKS"
    }

    /// Cached used space, if it was measured already.
    pub fn used_space(&self) -> Option<u64> {
        self.used_space.get().copied()
    }

    /// Store a measured used-space figure. The first measurement wins.
    pub fn cache_used_space(&self, used: u64) -> u64 {
        *self.used_space.get_or_init(|| used)
    }
}
