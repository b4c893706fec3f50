// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use livecopy_contracts::ToolError;
use livecopy_types::MountEntry;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount points live-boot uses for the medium the running system booted from.
const BOOT_MEDIUM_MOUNT_POINTS: &[&str] = &["/run/live/medium", "/lib/live/mount/medium"];

pub fn read_mounts() -> Result<Vec<MountEntry>, ToolError> {
    let mount_info = fs::read_to_string(MOUNTINFO)
        .map_err(|error| ToolError::io(format!("reading {MOUNTINFO}"), error))?;
    parse_mountinfo(&mount_info)
}

pub fn parse_mountinfo(input: &str) -> Result<Vec<MountEntry>, ToolError> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let invalid = || ToolError::other(format!("invalid mountinfo line: {line}"));

        let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;

        let mount_point = left.split_whitespace().nth(4).ok_or_else(invalid)?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(invalid)?;
        let source = right_fields.next().ok_or_else(invalid)?;

        entries.push(MountEntry {
            source: unescape_mount_field(source),
            mount_point: PathBuf::from(unescape_mount_field(mount_point)),
            fs_type: fs_type.to_string(),
        });
    }

    Ok(entries)
}

/// Mounts backed by partitions of `device_name`, innermost mount points first
/// so they can be unmounted in order.
pub fn device_mounts(entries: &[MountEntry], device_name: &str) -> Vec<MountEntry> {
    let mut mounts: Vec<MountEntry> = entries
        .iter()
        .filter(|entry| entry.belongs_to_device(device_name))
        .cloned()
        .collect();
    mounts.sort_by(|a, b| {
        b.mount_point
            .components()
            .count()
            .cmp(&a.mount_point.components().count())
    });
    mounts
}

pub fn is_boot_medium(entry: &MountEntry) -> bool {
    BOOT_MEDIUM_MOUNT_POINTS
        .iter()
        .any(|medium| entry.mount_point == Path::new(medium))
}

/// Whether the running live system booted from `device_name`.
pub fn is_boot_device(entries: &[MountEntry], device_name: &str) -> bool {
    entries
        .iter()
        .any(|entry| is_boot_medium(entry) && entry.belongs_to_device(device_name))
}

fn unescape_mount_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1].is_ascii_digit()
            && bytes[index + 2].is_ascii_digit()
            && bytes[index + 3].is_ascii_digit()
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num as char);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index] as char);
        index += 1;
    }

    output
}
