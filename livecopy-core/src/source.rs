// SPDX-License-Identifier: GPL-3.0-only

//! The system image being installed
//!
//! Either the running live medium (a directory) or an ISO image that is
//! loop-mounted for as long as the source lives. Top-level `EFI` and `boot`
//! go to the EFI partition, everything else to the system partition.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use livecopy_sys::tree_size;

use crate::error::{LiveCopyError, Result};
use crate::fs_tasks::blocking;
use crate::mount_stack::MountStack;

/// Top-level entries of the source that belong on the EFI partition.
pub const EFI_ENTRIES: [&str; 2] = ["EFI", "boot"];

/// Default location of the running live medium.
pub const LIVE_MEDIUM: &str = "/run/live/medium";

const VERSION_FILE: &str = ".disk/info";

pub struct SystemSource {
    root: PathBuf,
    version: String,
    system_bytes: u64,
    exchange_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    iso_mount: Option<MountStack>,
}

fn read_version(root: &Path) -> Result<String> {
    let path = root.join(VERSION_FILE);
    let content = fs::read_to_string(&path).map_err(|e| {
        LiveCopyError::Environment(format!(
            "cannot determine system version from {}: {e}",
            path.display()
        ))
    })?;
    content
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LiveCopyError::Environment(format!("{} is empty", path.display())))
}

/// Size of the tree minus the boot files that go to the EFI partition.
fn measure(root: &Path) -> io::Result<u64> {
    let total = tree_size(root)?;
    let mut efi = 0;
    for entry in EFI_ENTRIES {
        let path = root.join(entry);
        if path.is_dir() {
            efi += tree_size(&path)?;
        }
    }
    Ok(total.saturating_sub(efi))
}

impl SystemSource {
    /// Use a mounted live medium or unpacked image directory.
    pub async fn from_medium(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(LiveCopyError::Environment(format!(
                "system medium {} is missing",
                root.display()
            )));
        }
        let version = read_version(&root)?;
        let measured_root = root.clone();
        let system_bytes =
            blocking(format!("measuring {}", root.display()), move || measure(&measured_root))
                .await?;

        info!(root = %root.display(), %version, system_bytes, "system source ready");
        Ok(Self {
            root,
            version,
            system_bytes,
            exchange_dir: None,
            data_dir: None,
            iso_mount: None,
        })
    }

    /// Loop-mount an ISO image; the mount is held until [`Self::release`].
    pub async fn from_iso(image: &Path, mut mounts: MountStack) -> Result<Self> {
        let root = match mounts.mount_loop(image).await {
            Ok(root) => root,
            Err(error) => {
                mounts.release_all().await?;
                return Err(error.into());
            }
        };
        match Self::from_medium(root).await {
            Ok(mut source) => {
                source.iso_mount = Some(mounts);
                Ok(source)
            }
            Err(error) => {
                mounts.release_all().await?;
                Err(error)
            }
        }
    }

    /// Exchange content to copy onto new installations.
    pub fn with_exchange_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exchange_dir = Some(dir.into());
        self
    }

    /// Persistence content to copy onto new installations.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bytes going to the system partition
    pub fn system_size(&self) -> u64 {
        self.system_bytes
    }

    pub fn exchange_dir(&self) -> Option<&Path> {
        self.exchange_dir.as_deref()
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn is_iso(&self) -> bool {
        self.iso_mount.is_some()
    }

    /// Unmount the ISO image, if any.
    pub async fn release(&mut self) -> Result<()> {
        if let Some(mut mounts) = self.iso_mount.take() {
            mounts.release_all().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn medium_reports_version_and_split_sizes() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join(".disk/info"), "Debian Live 12 (20260301)\nbuild host\n");
        write(&root.path().join("live/filesystem.squashfs"), "0123456789");
        write(&root.path().join("EFI/boot/bootx64.efi"), "efi");
        write(&root.path().join("boot/grub/grub.cfg"), "cfg");

        let source = SystemSource::from_medium(root.path()).await.unwrap();
        assert_eq!(source.version(), "Debian Live 12 (20260301)");
        assert_eq!(source.system_size(), 10 + "Debian Live 12 (20260301)\nbuild host\n".len() as u64);
        assert!(!source.is_iso());
    }

    #[tokio::test]
    async fn missing_version_is_an_environment_error() {
        let root = tempfile::tempdir().unwrap();
        let err = SystemSource::from_medium(root.path()).await.err().unwrap();
        assert!(matches!(err, LiveCopyError::Environment(_)));

        let err = SystemSource::from_medium(root.path().join("gone")).await.err().unwrap();
        assert!(matches!(err, LiveCopyError::Environment(_)));
    }
}
