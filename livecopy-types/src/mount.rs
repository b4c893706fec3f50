// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One row of the host mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Mount source, e.g. "/dev/sdb1" or "overlay"
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    /// Whether this mount is backed by a partition of the block device `device_name`
    /// (e.g. "sdb" matches "/dev/sdb1", "nvme0n1" matches "/dev/nvme0n1p2").
    pub fn belongs_to_device(&self, device_name: &str) -> bool {
        let Some(source) = self.source.strip_prefix("/dev/") else {
            return false;
        };
        let Some(rest) = source.strip_prefix(device_name) else {
            return false;
        };
        let rest = rest.strip_prefix('p').filter(|_| ends_with_digit(device_name)).unwrap_or(rest);
        rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit())
    }
}

fn ends_with_digit(name: &str) -> bool {
    name.chars().last().is_some_and(|c| c.is_ascii_digit())
}
