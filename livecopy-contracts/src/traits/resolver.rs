// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use livecopy_types::StorageDevice;

use crate::ToolError;

#[async_trait]
pub trait DeviceResolver: Send + Sync {
    /// Describe the whole-disk block device `name` (e.g. "sdb").
    ///
    /// `Ok(None)` means the device is not (yet) enumerated or is not a whole
    /// disk.
    async fn resolve(&self, name: &str) -> Result<Option<StorageDevice>, ToolError>;

    async fn list_devices(&self) -> Result<Vec<StorageDevice>, ToolError>;
}
