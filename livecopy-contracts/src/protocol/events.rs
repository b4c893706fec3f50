// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use livecopy_types::OperationMode;

/// Progress of a running batch, as published by a spawned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ProgressEvent {
    BatchStarted {
        mode: OperationMode,
        devices: usize,
    },
    DeviceStarted {
        mode: OperationMode,
        device: String,
        index: usize,
        total: usize,
    },
    Step {
        step: String,
    },
    Progress {
        percent: u8,
    },
    Line {
        text: String,
    },
    Error {
        message: String,
    },
    DeviceFinished {
        mode: OperationMode,
        device: String,
        error: Option<String>,
    },
    BatchFinished {
        mode: OperationMode,
        succeeded: usize,
        failed: usize,
    },
    ResolutionStarted {
        path: String,
    },
    ResolutionFinished {
        path: String,
    },
}

impl ProgressEvent {
    /// Whether this event closes the stream of a batch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::BatchFinished { .. })
    }
}
