// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

use livecopy_contracts::ToolError;
use livecopy_types::{OperationMode, PartitionRole, SizeError};

/// Problems found before a batch starts. Nothing has been touched yet.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no device selected")]
    NoDevices,

    #[error("{device}: {source}")]
    Size {
        device: String,
        #[source]
        source: SizeError,
    },

    #[error("{device} has no {role} partition")]
    MissingPartition { device: String, role: PartitionRole },

    #[error("{device}: system partition holds {available_mib} MiB, {required_mib} MiB needed")]
    SystemPartitionTooSmall {
        device: String,
        required_mib: u64,
        available_mib: u64,
    },

    #[error("a passphrase is required but empty")]
    PassphraseRequired,

    #[error("{device}: {reason}")]
    Unsupported { device: String, reason: String },

    #[error("backup destination is not set")]
    BackupDestinationMissing,

    #[error("transfer source {0} is not available")]
    TransferSourceMissing(String),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LiveCopyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The operation cannot start on this host
    #[error("environment: {0}")]
    Environment(String),

    #[error("{expected} registry mutated while holding the {actual} lock")]
    WrongModeGuard {
        expected: OperationMode,
        actual: OperationMode,
    },

    #[error("background task failed: {0}")]
    Task(String),
}

impl LiveCopyError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LiveCopyError>;
