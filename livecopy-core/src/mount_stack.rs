// SPDX-License-Identifier: GPL-3.0-only

//! Scoped mounts
//!
//! A [`MountStack`] records every mount and LUKS mapping a workflow step
//! opens and releases them in reverse order. Callers always run
//! [`MountStack::release_all`], whether the step succeeded or not.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use livecopy_contracts::{MountAccess, SystemTools, ToolError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Held {
    Mount(PathBuf),
    Luks(String),
}

pub struct MountStack {
    tools: Arc<dyn SystemTools>,
    held: Vec<Held>,
    grace: Duration,
}

impl MountStack {
    /// `grace` is waited once before releasing so that file handles of
    /// finished child processes are gone.
    pub fn new(tools: Arc<dyn SystemTools>, grace: Duration) -> Self {
        Self {
            tools,
            held: Vec::new(),
            grace,
        }
    }

    pub async fn mount(&mut self, source: &str, access: MountAccess) -> Result<PathBuf, ToolError> {
        let mount_point = self.tools.mount(source, access).await?;
        debug!(source, mount_point = %mount_point.display(), "mounted");
        self.held.push(Held::Mount(mount_point.clone()));
        Ok(mount_point)
    }

    pub async fn mount_loop(&mut self, image: &Path) -> Result<PathBuf, ToolError> {
        let mount_point = self.tools.mount_loop(image).await?;
        self.held.push(Held::Mount(mount_point.clone()));
        Ok(mount_point)
    }

    pub async fn mount_overlay(
        &mut self,
        lower: &[PathBuf],
        upper: &Path,
        work: &Path,
    ) -> Result<PathBuf, ToolError> {
        let mount_point = self.tools.mount_overlay(lower, upper, work).await?;
        self.held.push(Held::Mount(mount_point.clone()));
        Ok(mount_point)
    }

    /// Open a LUKS container and return the mapper device.
    pub async fn open_luks(
        &mut self,
        partition: &str,
        passphrase: &str,
        name: &str,
    ) -> Result<String, ToolError> {
        let mapper = self.tools.luks_open(partition, passphrase, name).await?;
        self.held.push(Held::Luks(name.to_string()));
        Ok(mapper)
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release everything in reverse order. Every item is attempted; the
    /// first failure is returned.
    pub async fn release_all(&mut self) -> Result<(), ToolError> {
        if self.held.is_empty() {
            return Ok(());
        }
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        let mut first_error = None;
        while let Some(item) = self.held.pop() {
            let result = match &item {
                Held::Mount(mount_point) => self.tools.unmount(mount_point).await,
                Held::Luks(name) => self.tools.luks_close(name).await,
            };
            if let Err(error) = result {
                warn!(?item, %error, "release failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for MountStack {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            warn!(count = self.held.len(), "mount stack dropped without release");
        }
    }
}
