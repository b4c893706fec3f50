// SPDX-License-Identifier: GPL-3.0-only

//! Settings transfer from another installed device
//!
//! The source's live root is rebuilt read-only: the squashfs images of its
//! system partition are stacked below the upper directory of its data
//! partition, so files deleted on the source stay deleted. Selected subtrees
//! are then copied into the upper directory of the target's data partition.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use livecopy_contracts::{MountAccess, ProgressReporter};
use livecopy_types::{PartitionRole, StorageDevice, TransferCategory};

use crate::data_partition::{UPPER_DIR, WORK_DIR};
use crate::error::{LiveCopyError, Result};
use crate::fs_tasks::report_output;
use crate::mount_stack::MountStack;
use crate::session::Session;
use crate::workflow::{missing, mount_data, released};

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Squashfs images below `live/`, top-most layer first.
fn squashfs_images(system_root: &Path) -> Result<Vec<PathBuf>> {
    let live = system_root.join("live");
    let entries = fs::read_dir(&live)
        .map_err(|e| LiveCopyError::io(format!("listing {}", live.display()), e))?;
    let mut images = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| LiveCopyError::io(format!("listing {}", live.display()), e))?
            .path();
        if path.extension().is_some_and(|ext| ext == "squashfs") {
            images.push(path);
        }
    }
    images.sort();
    images.reverse();
    Ok(images)
}

/// Shell script copying `categories` from the merged `root` into the upper
/// directory of `destination`. Categories missing on the source are skipped.
pub fn copy_script(root: &Path, destination: &Path, categories: &[TransferCategory]) -> String {
    let upper = destination.join(UPPER_DIR);
    let mut script = String::from("set -e\n");
    for category in categories {
        let subtree = category.subtree();
        let from = root.join(subtree);
        if !from.exists() {
            debug!(?category, from = %from.display(), "nothing to transfer");
            continue;
        }
        let to = upper.join(subtree);
        let parent = to.parent().unwrap_or(&upper);
        script.push_str(&format!(
            "mkdir -p {parent}\nrm -rf {to}\ncp -av {from} {parent}/\n",
            parent = shell_quote(&parent.to_string_lossy()),
            to = shell_quote(&to.to_string_lossy()),
            from = shell_quote(&from.to_string_lossy()),
        ));
    }
    script
}

async fn transfer_mounted(
    session: &Session,
    mounts: &mut MountStack,
    source: &StorageDevice,
    categories: &[TransferCategory],
    destination: &Path,
    passphrase: Option<&str>,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let system = source
        .system_partition()
        .ok_or_else(|| missing(source, PartitionRole::System))?;
    let data = source
        .data_partition()
        .ok_or_else(|| missing(source, PartitionRole::Data))?;

    let system_root = mounts.mount(&system.path(), MountAccess::ReadOnly).await?;
    let mut lower = Vec::new();
    for image in squashfs_images(&system_root)? {
        lower.push(mounts.mount_loop(&image).await?);
    }
    let data_root = mount_data(mounts, data, passphrase).await?;
    let merged = mounts
        .mount_overlay(&lower, &data_root.join(UPPER_DIR), &data_root.join(WORK_DIR))
        .await?;

    let script = copy_script(&merged, destination, categories);
    reporter.line(&script);
    session
        .tools
        .run_script(&script, &|line: &str| report_output(reporter, line))
        .await?;
    Ok(())
}

/// Copy `categories` from the installed system on `source` into the mounted
/// data partition at `destination`. Every mount is released before returning.
pub async fn transfer(
    session: &Session,
    source: &StorageDevice,
    categories: &[TransferCategory],
    destination: &Path,
    passphrase: Option<&str>,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    if categories.is_empty() {
        return Ok(());
    }
    info!(source = %source.path(), ?categories, "transferring settings");
    let mut mounts = session.mount_stack();
    let result = transfer_mounted(
        session,
        &mut mounts,
        source,
        categories,
        destination,
        passphrase,
        reporter,
    )
    .await;
    released(&mut mounts, result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("/media/it's"), r"'/media/it'\''s'");
    }

    #[test]
    fn script_copies_existing_subtrees_only() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("etc/cups")).unwrap();
        let script = copy_script(
            root.path(),
            Path::new("/mnt/data"),
            &[TransferCategory::Printer, TransferCategory::Home],
        );
        assert!(script.starts_with("set -e\n"));
        assert!(script.contains("mkdir -p '/mnt/data/rw/etc'\n"));
        assert!(script.contains("rm -rf '/mnt/data/rw/etc/cups'\n"));
        assert!(!script.contains("home/user"));
    }
}
