// SPDX-License-Identifier: GPL-3.0-only

//! Per-mode device lists
//!
//! Readers take snapshots; every mutation needs the [`ModeGuard`] of the
//! registry's own mode. Each mutation bumps a revision published on a watch
//! channel.

use std::sync::RwLock;

use tokio::sync::watch;
use tracing::{debug, info};

use livecopy_types::{OperationMode, StorageDevice};

use crate::coordinator::ModeGuard;
use crate::error::{LiveCopyError, Result};

#[derive(Debug)]
pub struct DeviceRegistry {
    mode: OperationMode,
    devices: RwLock<Vec<StorageDevice>>,
    revision: watch::Sender<u64>,
}

impl DeviceRegistry {
    pub fn new(mode: OperationMode) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            mode,
            devices: RwLock::new(Vec::new()),
            revision,
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn snapshot(&self) -> Vec<StorageDevice> {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change notifications; the value is the current revision.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Whether a device with this path (e.g. "/dev/sdb") is listed.
    pub fn contains(&self, path: &str) -> bool {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|device| device.path() == path)
    }

    pub fn largest_device(&self) -> Option<StorageDevice> {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .max_by_key(|device| device.size)
            .cloned()
    }

    fn check_guard(&self, guard: &ModeGuard) -> Result<()> {
        if guard.mode() != self.mode {
            return Err(LiveCopyError::WrongModeGuard {
                expected: self.mode,
                actual: guard.mode(),
            });
        }
        Ok(())
    }

    fn changed(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Insert keeping path order. Returns `false` if the device is already listed.
    pub fn insert_sorted(&self, guard: &ModeGuard, device: StorageDevice) -> Result<bool> {
        self.check_guard(guard)?;
        let inserted = {
            let mut devices = self
                .devices
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match devices.binary_search(&device) {
                Ok(_) => false,
                Err(position) => {
                    info!(mode = %self.mode, device = %device.path(), "device added");
                    devices.insert(position, device);
                    true
                }
            }
        };
        if inserted {
            self.changed();
        }
        Ok(inserted)
    }

    /// Remove by kernel name (e.g. "sdb").
    pub fn remove_by_name(&self, guard: &ModeGuard, name: &str) -> Result<Option<StorageDevice>> {
        self.check_guard(guard)?;
        let removed = {
            let mut devices = self
                .devices
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            devices
                .iter()
                .position(|device| device.device == name)
                .map(|position| devices.remove(position))
        };
        if let Some(device) = &removed {
            info!(mode = %self.mode, device = %device.path(), "device removed");
            self.changed();
        }
        Ok(removed)
    }

    pub fn replace_all(&self, guard: &ModeGuard, mut devices: Vec<StorageDevice>) -> Result<()> {
        self.check_guard(guard)?;
        devices.sort();
        devices.dedup();
        debug!(mode = %self.mode, count = devices.len(), "registry refreshed");
        *self
            .devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = devices;
        self.changed();
        Ok(())
    }
}
