// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use livecopy_contracts::{DeviceResolver, ProgressReporter, SystemTools};
use livecopy_sys::DigestCache;
use livecopy_types::OperationMode;

use crate::coordinator::OperationCoordinator;
use crate::error::Result;
use crate::mount_stack::MountStack;
use crate::prober;
use crate::registry::DeviceRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// List fixed hard disks as targets
    pub show_hard_disks: bool,
    pub resolve_interval_ms: u64,
    pub resolve_timeout_ms: u64,
    /// Wait before unmounting after a workflow step
    pub unmount_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            show_hard_disks: false,
            resolve_interval_ms: 1000,
            resolve_timeout_ms: 10_000,
            unmount_grace_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn resolve_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_interval_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn unmount_grace(&self) -> Duration {
        Duration::from_millis(self.unmount_grace_ms)
    }
}

/// Everything shared by the hotplug monitor, the probers and the
/// orchestrators of one program run.
pub struct Session {
    pub coordinator: Arc<OperationCoordinator>,
    pub tools: Arc<dyn SystemTools>,
    pub resolver: Arc<dyn DeviceResolver>,
    pub digests: Arc<DigestCache>,
    pub config: SessionConfig,
    install: Arc<DeviceRegistry>,
    upgrade: Arc<DeviceRegistry>,
    reset: Arc<DeviceRegistry>,
}

impl Session {
    pub fn new(
        tools: Arc<dyn SystemTools>,
        resolver: Arc<dyn DeviceResolver>,
        config: SessionConfig,
    ) -> Self {
        Self {
            coordinator: Arc::new(OperationCoordinator::new()),
            tools,
            resolver,
            digests: Arc::new(DigestCache::new()),
            config,
            install: Arc::new(DeviceRegistry::new(OperationMode::Install)),
            upgrade: Arc::new(DeviceRegistry::new(OperationMode::Upgrade)),
            reset: Arc::new(DeviceRegistry::new(OperationMode::Reset)),
        }
    }

    pub fn registry(&self, mode: OperationMode) -> &Arc<DeviceRegistry> {
        match mode {
            OperationMode::Install => &self.install,
            OperationMode::Upgrade => &self.upgrade,
            OperationMode::Reset => &self.reset,
        }
    }

    pub fn mount_stack(&self) -> MountStack {
        MountStack::new(self.tools.clone(), self.config.unmount_grace())
    }

    /// Rebuild the registry of `mode` from a full device enumeration.
    pub async fn refresh(&self, mode: OperationMode, listener: &dyn ProgressReporter) -> Result<usize> {
        let mut devices = Vec::new();
        for device in self.resolver.list_devices().await? {
            if !prober::accepts(&device, mode, self.config.show_hard_disks) {
                continue;
            }
            listener.resolution_started(&device.path());
            prober::warm_up(self, &device, mode).await;
            listener.resolution_finished(&device.path());
            devices.push(device);
        }

        let count = devices.len();
        let guard = self.coordinator.lock(mode).await;
        self.registry(mode).replace_all(&guard, devices)?;
        info!(%mode, count, "device list refreshed");
        Ok(count)
    }
}
