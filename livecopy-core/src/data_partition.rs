// SPDX-License-Identifier: GPL-3.0-only

//! Layout of a mounted persistence partition
//!
//! ```text
//! persistence.conf   "/ union"
//! rw/                overlay upper directory (the changes to the system)
//! work/              overlay work directory
//! lost+found/        created by mkfs, never removed
//! ```
//!
//! All functions here are blocking.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

pub const PERSISTENCE_CONF: &str = "persistence.conf";
pub const PERSISTENCE_CONF_CONTENT: &str = "/ union\n";
pub const UPPER_DIR: &str = "rw";
pub const WORK_DIR: &str = "work";
pub const LOST_AND_FOUND: &str = "lost+found";
/// Home of the live user below the overlay root
pub const USER_HOME: &str = "home/user";

const WELCOME_CONFIG: &str = "etc/lernstickWelcome";
const ENCRYPTION_BOOT_OPTION: &str = "persistence-encryption=luks";

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn clear_dir_except(dir: &Path, keep: &[&str]) -> io::Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if keep.iter().any(|name| entry.file_name() == *name) {
            continue;
        }
        remove_path(&entry.path())?;
        removed += 1;
    }
    Ok(removed)
}

/// Write `persistence.conf`, which makes live-boot union-mount the partition.
pub fn write_config(root: &Path) -> io::Result<()> {
    fs::write(root.join(PERSISTENCE_CONF), PERSISTENCE_CONF_CONTENT)
}

/// Write `persistence.conf` and create the overlay directories.
pub fn prepare_layout(root: &Path) -> io::Result<()> {
    write_config(root)?;
    fs::create_dir_all(root.join(UPPER_DIR))?;
    fs::create_dir_all(root.join(WORK_DIR))?;
    Ok(())
}

/// Remove everything except `lost+found` and `persistence.conf`.
pub fn clear_all(root: &Path) -> io::Result<u64> {
    clear_dir_except(root, &[LOST_AND_FOUND, PERSISTENCE_CONF])
}

/// Selective deletion. `system` drops every change outside the homes,
/// `home` drops the live user's home.
pub fn clear(root: &Path, system: bool, home: bool) -> io::Result<u64> {
    let upper = root.join(UPPER_DIR);
    let mut removed = 0;
    if system {
        removed += clear_dir_except(&upper, &["home"])?;
        removed += clear_dir_except(&root.join(WORK_DIR), &[])?;
    }
    if home {
        let user_home = upper.join(USER_HOME);
        if fs::symlink_metadata(&user_home).is_ok() {
            remove_path(&user_home)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn copy_dir(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Create `rw/home/user` from a skeleton directory. Returns the home path.
pub fn seed_home(root: &Path, skeleton: &Path) -> io::Result<PathBuf> {
    let home = root.join(UPPER_DIR).join(USER_HOME);
    if skeleton.is_dir() {
        copy_dir(skeleton, &home)?;
    } else {
        debug!(skeleton = %skeleton.display(), "no skeleton, creating empty home");
        fs::create_dir_all(&home)?;
    }
    Ok(home)
}

/// Discard system-level changes before an upgrade.
///
/// Everything below `rw/` goes except the `keep` subtrees; `always_overwrite`
/// paths are removed even inside kept subtrees.
pub fn discard_system_changes(
    root: &Path,
    keep: &[&str],
    always_overwrite: &[PathBuf],
) -> io::Result<u64> {
    let upper = root.join(UPPER_DIR);
    let keep: Vec<&Path> = keep.iter().map(Path::new).collect();
    let mut removed = if upper.exists() {
        prune(&upper, Path::new(""), &keep)?
    } else {
        0
    };
    removed += clear_dir_except(&root.join(WORK_DIR), &[])?;

    for path in always_overwrite {
        let relative = path.strip_prefix("/").unwrap_or(path);
        let target = upper.join(relative);
        if fs::symlink_metadata(&target).is_ok() {
            remove_path(&target)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn prune(upper: &Path, relative: &Path, keep: &[&Path]) -> io::Result<u64> {
    let mut removed = 0;
    for entry in fs::read_dir(upper.join(relative))? {
        let entry = entry?;
        let child = relative.join(entry.file_name());
        if keep.iter().any(|kept| child.starts_with(kept)) {
            continue;
        }
        let leads_to_kept = keep.iter().any(|kept| kept.starts_with(&child));
        if leads_to_kept && entry.file_type()?.is_dir() {
            removed += prune(upper, &child, keep)?;
        } else {
            remove_path(&entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Make the first-boot welcome application show up again.
pub fn reactivate_welcome(root: &Path) -> io::Result<()> {
    let path = root.join(UPPER_DIR).join(WELCOME_CONFIG);
    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !line.trim_start().starts_with("ShowWelcome="))
        .map(str::to_string)
        .collect();
    lines.push("ShowWelcome=true".to_string());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(&path)?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

fn boot_configs(dir: &Path, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            boot_configs(&entry.path(), found)?;
        } else if file_type.is_file()
            && entry.path().extension().is_some_and(|ext| ext == "cfg")
        {
            found.push(entry.path());
        }
    }
    Ok(())
}

/// Add the encrypted-persistence boot option to every live boot entry below
/// `root`. Returns the number of files changed.
pub fn mark_boot_configs_encrypted(root: &Path) -> io::Result<usize> {
    let mut configs = Vec::new();
    boot_configs(root, &mut configs)?;

    let mut changed = 0;
    for config in configs {
        let content = fs::read_to_string(&config)?;
        let mut modified = false;
        let rewritten: Vec<String> = content
            .lines()
            .map(|line| {
                if line.contains("boot=live") && !line.contains(ENCRYPTION_BOOT_OPTION) {
                    modified = true;
                    format!("{line} {ENCRYPTION_BOOT_OPTION}")
                } else {
                    line.to_string()
                }
            })
            .collect();
        if modified {
            let mut text = rewritten.join("\n");
            if content.ends_with('\n') {
                text.push('\n');
            }
            fs::write(&config, text)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Copy a file or directory from the host into the overlay upper directory.
/// `destination` is an absolute path of the live system. Returns the copied
/// path on the data partition.
pub fn restore_entry(root: &Path, source: &Path, destination: &Path) -> io::Result<PathBuf> {
    let relative = destination.strip_prefix("/").unwrap_or(destination);
    let components: Vec<Component> = relative.components().collect();
    if !components.iter().any(|c| matches!(c, Component::Normal(_)))
        || components.contains(&Component::ParentDir)
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot restore onto {}", destination.display()),
        ));
    }
    let target = root.join(UPPER_DIR).join(relative);
    if fs::symlink_metadata(&target).is_ok() {
        remove_path(&target)?;
    }
    if source.is_dir() {
        copy_dir(source, &target)?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &target)?;
    }
    Ok(target)
}
