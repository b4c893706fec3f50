// SPDX-License-Identifier: GPL-3.0-only

//! Turning a hotplug path into a registry entry

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use livecopy_contracts::{MountAccess, ProgressReporter, SystemTools, ToolError};
use livecopy_types::{DeviceType, OperationMode, Partition, StorageDevice};

use crate::error::Result;
use crate::hotplug::{device_name, is_partition_name};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Inserted,
    AlreadyListed,
    /// Resolved, but not a target for this mode
    Filtered,
    Unresolved,
    NotWholeDisk,
}

/// Whether `device` is a candidate for `mode`.
pub fn accepts(device: &StorageDevice, mode: OperationMode, show_hard_disks: bool) -> bool {
    match device.device_type {
        DeviceType::OpticalDisc | DeviceType::Unknown => return false,
        DeviceType::HardDrive | DeviceType::Raid if !show_hard_disks => return false,
        _ => {}
    }
    match mode {
        OperationMode::Install => true,
        OperationMode::Upgrade => device.has_installed_system(),
        OperationMode::Reset => {
            device.exchange_partition().is_some() || device.data_partition().is_some()
        }
    }
}

/// Used bytes of a partition, measured once and cached in the descriptor.
/// Encrypted partitions are not measured.
pub async fn measure_used_space(
    tools: &dyn SystemTools,
    partition: &Partition,
) -> std::result::Result<Option<u64>, ToolError> {
    if let Some(used) = partition.used_space() {
        return Ok(Some(used));
    }
    if partition.is_encrypted() {
        return Ok(None);
    }

    let used = match &partition.mount_point {
        Some(mount_point) => tools.filesystem_usage(mount_point).await?.used,
        None => {
            let mount_point = tools.mount(&partition.path(), MountAccess::ReadOnly).await?;
            let usage = tools.filesystem_usage(&mount_point).await;
            tools.unmount(&mount_point).await?;
            usage?.used
        }
    };
    Ok(Some(partition.cache_used_space(used)))
}

/// Mode-specific reads done before the device is listed, so that later
/// rendering does not block on them. Failures are only logged.
pub async fn warm_up(session: &Session, device: &StorageDevice, mode: OperationMode) {
    let partitions: Vec<&Partition> = match mode {
        OperationMode::Install => Vec::new(),
        OperationMode::Upgrade => [device.data_partition(), device.exchange_partition()]
            .into_iter()
            .flatten()
            .collect(),
        OperationMode::Reset => device.exchange_partition().into_iter().collect(),
    };

    for partition in partitions {
        if let Err(error) = measure_used_space(session.tools.as_ref(), partition).await {
            warn!(partition = %partition.path(), %error, "could not measure used space");
        }
    }
}

async fn resolve_with_retry(session: &Session, name: &str) -> Option<StorageDevice> {
    let deadline = Instant::now() + session.config.resolve_timeout();
    loop {
        match session.resolver.resolve(name).await {
            Ok(Some(device)) => return Some(device),
            Ok(None) => {}
            Err(error) => debug!(device = name, %error, "resolution attempt failed"),
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(session.config.resolve_interval()).await;
    }
}

/// Resolve `event_path` and list the device in the registry of `mode`.
pub async fn probe(
    session: &Session,
    event_path: &str,
    mode: OperationMode,
    listener: &dyn ProgressReporter,
) -> Result<ProbeOutcome> {
    let name = device_name(event_path);
    if name.is_empty() || is_partition_name(name) {
        return Ok(ProbeOutcome::NotWholeDisk);
    }

    listener.resolution_started(event_path);
    let resolved = resolve_with_retry(session, name).await;
    let outcome = match resolved {
        None => {
            debug!(path = event_path, "device vanished before it could be resolved");
            Ok(ProbeOutcome::Unresolved)
        }
        Some(device) if !accepts(&device, mode, session.config.show_hard_disks) => {
            debug!(device = %device.path(), %mode, "not a target");
            Ok(ProbeOutcome::Filtered)
        }
        Some(device) => {
            warm_up(session, &device, mode).await;
            insert(session, device, mode).await
        }
    };
    listener.resolution_finished(event_path);
    outcome
}

async fn insert(session: &Session, device: StorageDevice, mode: OperationMode) -> Result<ProbeOutcome> {
    let guard = session.coordinator.lock(mode).await;
    let registry = session.registry(mode);
    // a full refresh or another prober may have listed it meanwhile
    if registry.contains(&device.path()) {
        return Ok(ProbeOutcome::AlreadyListed);
    }
    if registry.insert_sorted(&guard, device)? {
        Ok(ProbeOutcome::Inserted)
    } else {
        Ok(ProbeOutcome::AlreadyListed)
    }
}

/// Remove a device from the registry of `mode`.
pub async fn remove(session: &Session, event_path: &str, mode: OperationMode) -> Result<bool> {
    let name = device_name(event_path);
    let guard = session.coordinator.lock(mode).await;
    Ok(session.registry(mode).remove_by_name(&guard, name)?.is_some())
}
