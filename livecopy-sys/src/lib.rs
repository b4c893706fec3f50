// SPDX-License-Identifier: GPL-3.0-only

//! Host-side operations for livecopy
//!
//! This crate talks to the running system:
//! - external tool invocation with output and progress parsing
//! - the mount table and boot medium detection
//! - block device enumeration through lsblk and sysfs
//! - file tree copies with digest verification, random overwrite
//!
//! [`HostTools`] and [`LsblkResolver`] implement the contracts the
//! orchestration core is written against. Most operations require root.

pub mod cmd;
pub mod copy;
pub mod digest;
pub mod host;
pub mod lsblk;
pub mod monitor;
pub mod mounts;
pub mod progress;
pub mod wipe;

pub use copy::{CopyOptions, CopyStats, copy_tree, tree_size};
pub use digest::DigestCache;
pub use host::HostTools;
pub use lsblk::{LsblkResolver, parse_lsblk};
pub use monitor::{MonitorKind, MonitorProcess};
pub use mounts::{device_mounts, is_boot_device, parse_mountinfo, read_mounts};
pub use progress::parse_progress;
