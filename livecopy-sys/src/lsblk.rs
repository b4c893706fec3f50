// SPDX-License-Identifier: GPL-3.0-only

//! Block device enumeration through `lsblk --json`

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use livecopy_contracts::{DeviceResolver, ToolError};
use livecopy_types::{DeviceType, Partition, RaidInfo, StorageDevice};

use crate::cmd;

const LSBLK_COLUMNS: &str = "NAME,TYPE,SIZE,TRAN,VENDOR,MODEL,SERIAL,REV,RM,FSTYPE,LABEL,MOUNTPOINT";
const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Value,
    tran: Option<String>,
    vendor: Option<String>,
    model: Option<String>,
    serial: Option<String>,
    rev: Option<String>,
    #[serde(default)]
    rm: Value,
    fstype: Option<String>,
    label: Option<String>,
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// lsblk prints numbers as JSON numbers or strings depending on its version.
fn value_u64(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(0)
}

fn value_bool(value: &Value) -> bool {
    value
        .as_bool()
        .or_else(|| value.as_u64().map(|n| n != 0))
        .or_else(|| value.as_str().map(|s| s.trim() == "1"))
        .unwrap_or(false)
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn device_type(device: &LsblkDevice) -> DeviceType {
    match device.kind.as_str() {
        "rom" => DeviceType::OpticalDisc,
        kind if kind.starts_with("raid") => DeviceType::Raid,
        "disk" if device.tran.as_deref() == Some("usb") || value_bool(&device.rm) => {
            DeviceType::UsbFlashDrive
        }
        "disk" => DeviceType::HardDrive,
        _ => DeviceType::Unknown,
    }
}

/// Partition number from the kernel name of a partition of `parent`.
fn partition_number(parent: &str, name: &str) -> Option<u32> {
    let rest = name.strip_prefix(parent)?;
    let rest = rest.strip_prefix('p').unwrap_or(rest);
    rest.parse().ok()
}

fn to_storage_device(device: &LsblkDevice) -> Option<StorageDevice> {
    let device_type = device_type(device);
    if device_type == DeviceType::Unknown {
        return None;
    }

    let partitions = device
        .children
        .iter()
        .filter(|child| child.kind == "part")
        .enumerate()
        .map(|(index, child)| {
            let number = partition_number(&device.name, &child.name).unwrap_or(index as u32 + 1);
            let mut partition = Partition::new(
                device.name.as_str(),
                number,
                child.name.as_str(),
                0,
                value_u64(&child.size),
                text(&child.fstype),
                text(&child.label),
            );
            partition.mount_point = child
                .mountpoint
                .as_deref()
                .filter(|m| !m.is_empty())
                .map(PathBuf::from);
            partition
        })
        .collect();

    let raid = (device_type == DeviceType::Raid).then(|| RaidInfo {
        level: device.kind.clone(),
        member_count: 0,
    });

    Some(StorageDevice {
        device: device.name.clone(),
        device_type,
        vendor: text(&device.vendor),
        model: text(&device.model),
        serial: text(&device.serial),
        revision: text(&device.rev),
        size: value_u64(&device.size),
        removable: value_bool(&device.rm),
        raid,
        partitions,
    })
}

/// Parse `lsblk --json` output into whole-disk descriptors. Top-level entries
/// that are not disks (e.g. a partition queried directly) are skipped.
pub fn parse_lsblk(json: &str) -> Result<Vec<StorageDevice>, ToolError> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|error| ToolError::other(format!("unparsable lsblk output: {error}")))?;
    Ok(output
        .blockdevices
        .iter()
        .filter_map(to_storage_device)
        .collect())
}

/// [`DeviceResolver`] backed by `lsblk` and sysfs.
#[derive(Debug, Clone)]
pub struct LsblkResolver {
    sysfs_block: PathBuf,
}

impl Default for LsblkResolver {
    fn default() -> Self {
        Self {
            sysfs_block: PathBuf::from("/sys/class/block"),
        }
    }
}

impl LsblkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sysfs_u64(&self, name: &str, attribute: &str) -> Option<u64> {
        let path = self.sysfs_block.join(name).join(attribute);
        tokio::fs::read_to_string(&path)
            .await
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }

    /// Fill in what lsblk does not print: partition offsets and RAID members.
    async fn complete(&self, mut device: StorageDevice) -> StorageDevice {
        for partition in &mut device.partitions {
            match self.sysfs_u64(&partition.device_and_number, "start").await {
                Some(start) => partition.offset = start * SECTOR_SIZE,
                None => warn!(partition = %partition.device_and_number, "partition offset unknown"),
            }
        }
        if let Some(raid) = device.raid.as_mut() {
            if let Some(members) = self.sysfs_u64(&device.device, "md/raid_disks").await {
                raid.member_count = members as u32;
            }
        }
        device
    }

    async fn lsblk(&self, target: Option<&str>) -> Result<Vec<StorageDevice>, ToolError> {
        let mut args = vec!["--json", "--bytes", "--output", LSBLK_COLUMNS];
        if let Some(target) = target {
            args.push(target);
        }
        let outcome = cmd::run("lsblk", &args).await?;
        parse_lsblk(&outcome.stdout)
    }
}

#[async_trait]
impl DeviceResolver for LsblkResolver {
    async fn resolve(&self, name: &str) -> Result<Option<StorageDevice>, ToolError> {
        let path = format!("/dev/{name}");
        let devices = match self.lsblk(Some(&path)).await {
            Ok(devices) => devices,
            // lsblk exits non-zero for nodes that do not exist (yet)
            Err(ToolError::CommandFailed { stderr, .. }) => {
                debug!(device = %path, %stderr, "not resolvable");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };
        match devices.into_iter().find(|device| device.device == name) {
            Some(device) => Ok(Some(self.complete(device).await)),
            None => Ok(None),
        }
    }

    async fn list_devices(&self) -> Result<Vec<StorageDevice>, ToolError> {
        let mut devices = Vec::new();
        for device in self.lsblk(None).await? {
            devices.push(self.complete(device).await);
        }
        devices.sort();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use livecopy_types::PartitionRole;

    use super::*;

    const SAMPLE: &str = r#"{
       "blockdevices": [
          {"name":"nvme0n1", "type":"disk", "size":512110190592, "tran":"nvme", "vendor":null,
           "model":"Samsung SSD 970", "serial":"S4EWNX0N", "rev":"2B2QEXE7", "rm":false,
           "fstype":null, "label":null, "mountpoint":null,
           "children": [
              {"name":"nvme0n1p1", "type":"part", "size":536870912, "rm":false, "fstype":"vfat",
               "label":null, "mountpoint":"/boot/efi"}
           ]},
          {"name":"sdb", "type":"disk", "size":"15931539456", "tran":"usb", "vendor":"SanDisk ",
           "model":"Cruzer Blade ", "serial":"4C530001", "rev":"1.00", "rm":"1",
           "fstype":null, "label":null, "mountpoint":null,
           "children": [
              {"name":"sdb1", "type":"part", "size":"209715200", "rm":"1", "fstype":"vfat",
               "label":"EFI", "mountpoint":null},
              {"name":"sdb2", "type":"part", "size":"4294967296", "rm":"1", "fstype":"exfat",
               "label":"Stick 001", "mountpoint":null},
              {"name":"sdb3", "type":"part", "size":"6442450944", "rm":"1", "fstype":"ext4",
               "label":"persistence", "mountpoint":null},
              {"name":"sdb4", "type":"part", "size":"4294967296", "rm":"1", "fstype":"vfat",
               "label":"system", "mountpoint":"/run/live/medium"}
           ]},
          {"name":"sr0", "type":"rom", "size":1073741312, "tran":"sata", "rm":true},
          {"name":"sdc1", "type":"part", "size":1000, "rm":true}
       ]
    }"#;

    #[test]
    fn parses_disks_and_skips_bare_partitions() {
        let devices = parse_lsblk(SAMPLE).unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(names, vec!["nvme0n1", "sdb", "sr0"]);
        assert_eq!(devices[0].device_type, DeviceType::HardDrive);
        assert_eq!(devices[1].device_type, DeviceType::UsbFlashDrive);
        assert_eq!(devices[2].device_type, DeviceType::OpticalDisc);
    }

    #[test]
    fn partitions_carry_roles_and_numbers() {
        let devices = parse_lsblk(SAMPLE).unwrap();
        let stick = &devices[1];
        assert_eq!(stick.vendor, "SanDisk");
        assert_eq!(stick.size, 15931539456);
        assert!(stick.removable);
        assert_eq!(stick.partitions.len(), 4);
        assert_eq!(stick.exchange_partition().map(|p| p.number), Some(2));
        assert_eq!(stick.data_partition().map(|p| p.path()), Some("/dev/sdb3".to_string()));
        let system = stick.partition(PartitionRole::System).unwrap();
        assert_eq!(system.mount_point, Some(PathBuf::from("/run/live/medium")));

        assert_eq!(devices[0].partitions[0].number, 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_lsblk("not json").is_err());
    }
}
