// SPDX-License-Identifier: GPL-3.0-only

//! Partition size calculation
//!
//! Every function in this module is pure. Device sizes come in bytes, all
//! partition sizes are whole MiB.
//!
//! Layout of a provisioned device: `[EFI][exchange?][data?][system]`. The EFI
//! partition has a fixed size, the system partition gets the enlarged system
//! size and the remaining space (the *overhead*) is split between the optional
//! exchange partition and the data partition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{MIB, bytes_to_mib};
use crate::partition::PartitionRole;

/// Fixed size of the EFI/boot partition.
pub const EFI_PARTITION_SIZE_MIB: u64 = 200;

/// Safety margin applied to the system image size.
pub const SYSTEM_SIZE_FACTOR: f64 = 1.1;

/// Smallest exchange partition worth creating.
pub const MINIMUM_EXCHANGE_SIZE_MIB: u64 = 200;

/// Partitions start at a 1 MiB boundary.
pub const ALIGNMENT_MIB: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeError {
    #[error("device too small: {required_mib} MiB required, {device_mib} MiB available")]
    TooSmall { required_mib: u64, device_mib: u64 },

    #[error("exchange partition of {requested_mib} MiB does not fit, at most {available_mib} MiB available")]
    ExchangeTooLarge {
        requested_mib: u64,
        available_mib: u64,
    },

    #[error("exchange partition content ({used_mib} MiB) does not fit into {target_mib} MiB")]
    ExchangeContentDoesNotFit { used_mib: u64, target_mib: u64 },

    #[error("data partition content ({used_mib} MiB) does not fit into {available_mib} MiB")]
    DataDoesNotFit { used_mib: u64, available_mib: u64 },
}

/// How much of a live system layout fits onto a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    /// Not even EFI + system fit
    TooSmall,
    /// The system fits, but no exchange partition of minimum size
    NoExchange,
    /// An exchange partition of at least minimum size fits
    Exchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSizes {
    pub efi_mib: u64,
    pub exchange_mib: u64,
    pub data_mib: u64,
    pub system_mib: u64,
}

impl PartitionSizes {
    pub fn total_mib(&self) -> u64 {
        self.efi_mib + self.exchange_mib + self.data_mib + self.system_mib
    }

    pub fn has_exchange(&self) -> bool {
        self.exchange_mib > 0
    }

    pub fn has_data(&self) -> bool {
        self.data_mib > 0
    }
}

/// System size plus safety margin, in MiB (rounded up).
pub fn enlarged_system_size(system_bytes: u64) -> u64 {
    let mib = system_bytes as f64 / MIB as f64;
    (mib * SYSTEM_SIZE_FACTOR).ceil() as u64
}

/// Space left for exchange and data after reserving EFI and system,
/// `None` when EFI and system alone do not fit.
pub fn overhead(device_bytes: u64, enlarged_system_mib: u64) -> Option<u64> {
    bytes_to_mib(device_bytes)
        .checked_sub(EFI_PARTITION_SIZE_MIB)?
        .checked_sub(enlarged_system_mib)
}

pub fn partition_state(device_bytes: u64, enlarged_system_mib: u64) -> PartitionState {
    match overhead(device_bytes, enlarged_system_mib) {
        None => PartitionState::TooSmall,
        Some(free) if free < MINIMUM_EXCHANGE_SIZE_MIB => PartitionState::NoExchange,
        Some(_) => PartitionState::Exchange,
    }
}

/// Compute the partition sizes for one device.
///
/// `requested_exchange_mib == 0` means "no exchange partition"; the whole
/// overhead then becomes the data partition.
pub fn calculate(
    device_bytes: u64,
    enlarged_system_mib: u64,
    requested_exchange_mib: u64,
) -> Result<PartitionSizes, SizeError> {
    let device_mib = bytes_to_mib(device_bytes);
    let free = overhead(device_bytes, enlarged_system_mib).ok_or(SizeError::TooSmall {
        required_mib: EFI_PARTITION_SIZE_MIB + enlarged_system_mib,
        device_mib,
    })?;

    if requested_exchange_mib > 0 {
        if free < MINIMUM_EXCHANGE_SIZE_MIB {
            return Err(SizeError::TooSmall {
                required_mib: EFI_PARTITION_SIZE_MIB
                    + enlarged_system_mib
                    + MINIMUM_EXCHANGE_SIZE_MIB,
                device_mib,
            });
        }
        if requested_exchange_mib > free {
            return Err(SizeError::ExchangeTooLarge {
                requested_mib: requested_exchange_mib,
                available_mib: free,
            });
        }
    }

    Ok(PartitionSizes {
        efi_mib: EFI_PARTITION_SIZE_MIB,
        exchange_mib: requested_exchange_mib,
        data_mib: free - requested_exchange_mib,
        system_mib: enlarged_system_mib,
    })
}

/// Largest exchange partition that fits on every selected device.
pub fn max_exchange_size(device_sizes: &[u64], enlarged_system_mib: u64) -> u64 {
    device_sizes
        .iter()
        .map(|&size| overhead(size, enlarged_system_mib).unwrap_or(0))
        .min()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub number: u32,
    pub role: PartitionRole,
    pub start_mib: u64,
    pub size_mib: u64,
}

impl PartitionSpec {
    pub fn end_mib(&self) -> u64 {
        self.start_mib + self.size_mib
    }
}

/// Ordered partitions to create on a blank device.
///
/// The last partition is created up to the end of the device so it absorbs
/// the alignment gap in front of the first one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    pub partitions: Vec<PartitionSpec>,
}

impl PartitionLayout {
    pub fn from_sizes(sizes: &PartitionSizes) -> Self {
        let candidates = [
            (PartitionRole::Efi, sizes.efi_mib),
            (PartitionRole::Exchange, sizes.exchange_mib),
            (PartitionRole::Data, sizes.data_mib),
            (PartitionRole::System, sizes.system_mib),
        ];

        let mut partitions = Vec::with_capacity(candidates.len());
        let mut start_mib = ALIGNMENT_MIB;
        for (role, size_mib) in candidates {
            if size_mib == 0 {
                continue;
            }
            partitions.push(PartitionSpec {
                number: partitions.len() as u32 + 1,
                role,
                start_mib,
                size_mib,
            });
            start_mib += size_mib;
        }

        Self { partitions }
    }

    pub fn number_of(&self, role: PartitionRole) -> Option<u32> {
        self.partitions
            .iter()
            .find(|spec| spec.role == role)
            .map(|spec| spec.number)
    }

    pub fn spec(&self, role: PartitionRole) -> Option<&PartitionSpec> {
        self.partitions.iter().find(|spec| spec.role == role)
    }
}

/// New exchange/data split for an upgrade that resizes or removes the
/// exchange partition. Both partitions share the space they occupy today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepartitionPlan {
    /// 0 removes the exchange partition
    pub exchange_mib: u64,
    pub data_mib: u64,
}

impl RepartitionPlan {
    pub fn compute(
        current_exchange_mib: u64,
        current_data_mib: u64,
        target_exchange_mib: u64,
        exchange_used_mib: u64,
        data_used_mib: u64,
    ) -> Result<Self, SizeError> {
        let pool = current_exchange_mib + current_data_mib;

        if target_exchange_mib > 0 && target_exchange_mib < exchange_used_mib {
            return Err(SizeError::ExchangeContentDoesNotFit {
                used_mib: exchange_used_mib,
                target_mib: target_exchange_mib,
            });
        }
        if target_exchange_mib > pool {
            return Err(SizeError::ExchangeTooLarge {
                requested_mib: target_exchange_mib,
                available_mib: pool,
            });
        }

        let data_mib = pool - target_exchange_mib;
        if data_mib < data_used_mib {
            return Err(SizeError::DataDoesNotFit {
                used_mib: data_used_mib,
                available_mib: data_mib,
            });
        }

        Ok(Self {
            exchange_mib: target_exchange_mib,
            data_mib,
        })
    }

    pub fn removes_exchange(&self) -> bool {
        self.exchange_mib == 0
    }
}
