// SPDX-License-Identifier: GPL-3.0-only

//! Recursive file tree copy with progress and digest checks
//!
//! Blocking; callers run it on the blocking pool.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::digest::{DigestCache, file_digest};
use crate::progress::compute_progress_percent;

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions<'a> {
    /// Skip destination files whose digest already matches the source
    pub digests: Option<&'a DigestCache>,
    /// Re-read every copied file and compare digests
    pub verify: bool,
    /// Remove destination entries that do not exist in the source
    pub remove_stale: bool,
    /// Top-level names of the source left out of the copy
    pub exclude: &'a [&'a str],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub removed: u64,
}

enum EntryKind {
    Dir,
    File(u64),
    Symlink,
}

struct Entry {
    relative: PathBuf,
    kind: EntryKind,
}

fn collect(root: &Path, relative: &Path, entries: &mut Vec<Entry>) -> io::Result<()> {
    let mut children: Vec<_> = fs::read_dir(root.join(relative))?.collect::<Result<_, _>>()?;
    children.sort_by_key(|child| child.file_name());

    for child in children {
        let child_relative = relative.join(child.file_name());
        let file_type = child.file_type()?;
        if file_type.is_symlink() {
            entries.push(Entry {
                relative: child_relative,
                kind: EntryKind::Symlink,
            });
        } else if file_type.is_dir() {
            entries.push(Entry {
                relative: child_relative.clone(),
                kind: EntryKind::Dir,
            });
            collect(root, &child_relative, entries)?;
        } else if file_type.is_file() {
            entries.push(Entry {
                relative: child_relative,
                kind: EntryKind::File(child.metadata()?.len()),
            });
        }
    }
    Ok(())
}

fn copy_file(source: &Path, destination: &Path) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(destination)?;
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    // FAT targets reject permission changes
    if let Ok(metadata) = reader.metadata() {
        let _ = fs::set_permissions(destination, metadata.permissions());
    }
    Ok(copied)
}

fn unchanged(source: &Path, destination: &Path, len: u64, digests: &DigestCache) -> io::Result<bool> {
    match fs::symlink_metadata(destination) {
        Ok(metadata) if metadata.is_file() && metadata.len() == len => {
            Ok(digests.digest(source)? == digests.digest(destination)?)
        }
        _ => Ok(false),
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn is_excluded(relative: &Path, exclude: &[&str]) -> bool {
    relative
        .components()
        .next()
        .is_some_and(|first| exclude.iter().any(|name| first.as_os_str() == *name))
}

fn remove_stale(
    source: &Path,
    destination: &Path,
    relative: &Path,
    exclude: &[&str],
) -> io::Result<u64> {
    let mut removed = 0;
    for child in fs::read_dir(destination.join(relative))? {
        let child = child?;
        let child_relative = relative.join(child.file_name());
        if is_excluded(&child_relative, exclude) {
            continue;
        }
        let in_source = fs::symlink_metadata(source.join(&child_relative));
        match in_source {
            Err(_) => {
                debug!(path = %child_relative.display(), "removing stale entry");
                remove_path(&child.path())?;
                removed += 1;
            }
            Ok(metadata) if metadata.is_dir() && child.file_type()?.is_dir() => {
                removed += remove_stale(source, destination, &child_relative, exclude)?;
            }
            Ok(_) => {}
        }
    }
    Ok(removed)
}

/// Total size of the regular files below `root`.
pub fn tree_size(root: &Path) -> io::Result<u64> {
    let mut entries = Vec::new();
    collect(root, Path::new(""), &mut entries)?;
    Ok(entries
        .iter()
        .map(|entry| match entry.kind {
            EntryKind::File(len) => len,
            _ => 0,
        })
        .sum())
}

/// Copy the contents of `source` into `destination`, reporting percentage
/// progress by bytes.
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    options: &CopyOptions<'_>,
    progress: &mut dyn FnMut(u8),
) -> io::Result<CopyStats> {
    let mut entries = Vec::new();
    collect(source, Path::new(""), &mut entries)?;
    entries.retain(|entry| !is_excluded(&entry.relative, options.exclude));
    let total: u64 = entries
        .iter()
        .map(|entry| match entry.kind {
            EntryKind::File(len) => len,
            _ => 0,
        })
        .sum();

    fs::create_dir_all(destination)?;
    let mut stats = CopyStats::default();
    if options.remove_stale {
        stats.removed = remove_stale(source, destination, Path::new(""), options.exclude)?;
    }

    let mut processed = 0u64;
    let mut last_percent = None;
    for entry in &entries {
        let from = source.join(&entry.relative);
        let to = destination.join(&entry.relative);
        match entry.kind {
            EntryKind::Dir => {
                if fs::symlink_metadata(&to).is_ok_and(|m| !m.is_dir()) {
                    remove_path(&to)?;
                }
                fs::create_dir_all(&to)?;
            }
            EntryKind::Symlink => {
                let target = fs::read_link(&from)?;
                if fs::symlink_metadata(&to).is_ok() {
                    remove_path(&to)?;
                }
                std::os::unix::fs::symlink(target, &to)?;
            }
            EntryKind::File(len) => {
                let skip = match options.digests {
                    Some(digests) => unchanged(&from, &to, len, digests)?,
                    None => false,
                };
                if skip {
                    stats.skipped += 1;
                } else {
                    if fs::symlink_metadata(&to).is_ok_and(|m| m.is_dir()) {
                        fs::remove_dir_all(&to)?;
                    }
                    stats.bytes += copy_file(&from, &to)?;
                    stats.files += 1;
                    if options.verify {
                        let expected = match options.digests {
                            Some(digests) => digests.digest(&from)?,
                            None => file_digest(&from)?,
                        };
                        if file_digest(&to)? != expected {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("digest mismatch after copying {}", entry.relative.display()),
                            ));
                        }
                    }
                }
                processed += len;
                let percent = compute_progress_percent(processed, total);
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    progress(percent);
                }
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn copies_nested_tree_and_reports_completion() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        write(&source.path().join("live/filesystem.squashfs"), "squash");
        write(&source.path().join("boot/grub/grub.cfg"), "menuentry");
        std::os::unix::fs::symlink("grub.cfg", source.path().join("boot/grub/loopback.cfg")).unwrap();

        let mut reported = Vec::new();
        let options = CopyOptions {
            verify: true,
            ..Default::default()
        };
        let stats = copy_tree(source.path(), destination.path(), &options, &mut |p| reported.push(p)).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(
            fs::read_to_string(destination.path().join("live/filesystem.squashfs")).unwrap(),
            "squash"
        );
        assert_eq!(
            fs::read_link(destination.path().join("boot/grub/loopback.cfg")).unwrap(),
            PathBuf::from("grub.cfg")
        );
        assert_eq!(reported.last(), Some(&100));
        assert_eq!(tree_size(source.path()).unwrap(), 15);
    }

    #[test]
    fn excluded_top_level_entries_are_neither_copied_nor_removed() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        write(&source.path().join("EFI/boot/bootx64.efi"), "efi");
        write(&source.path().join("live/vmlinuz"), "kernel");
        write(&destination.path().join("EFI/keep"), "keep");

        let options = CopyOptions {
            remove_stale: true,
            exclude: &["EFI"],
            ..Default::default()
        };
        copy_tree(source.path(), destination.path(), &options, &mut |_| {}).unwrap();

        assert!(destination.path().join("live/vmlinuz").exists());
        assert!(!destination.path().join("EFI/boot").exists());
        assert!(destination.path().join("EFI/keep").exists());
    }

    #[test]
    fn identical_files_are_skipped_and_stale_files_removed() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        write(&source.path().join("live/vmlinuz"), "kernel-2");
        write(&source.path().join("live/initrd.img"), "initrd");
        write(&destination.path().join("live/initrd.img"), "initrd");
        write(&destination.path().join("live/vmlinuz"), "kernel-1");
        write(&destination.path().join("live/old.squashfs"), "stale");

        let digests = DigestCache::new();
        let options = CopyOptions {
            digests: Some(&digests),
            remove_stale: true,
            ..Default::default()
        };
        let stats = copy_tree(source.path(), destination.path(), &options, &mut |_| {}).unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.removed, 1);
        assert!(!destination.path().join("live/old.squashfs").exists());
        assert_eq!(
            fs::read_to_string(destination.path().join("live/vmlinuz")).unwrap(),
            "kernel-2"
        );
    }
}
