// SPDX-License-Identifier: GPL-3.0-only

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};

use crate::device::StorageDevice;

/// Outcome of one device in a batch.
///
/// Created when the device's workflow starts; `finish` is called exactly once
/// when it ends. Until then the result is "in progress" and has no duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDeviceResult {
    pub device: StorageDevice,
    pub started: DateTime<Local>,
    finished: Option<DateTime<Local>>,
    error_message: Option<String>,
}

impl StorageDeviceResult {
    pub fn start(device: StorageDevice) -> Self {
        Self {
            device,
            started: Local::now(),
            finished: None,
            error_message: None,
        }
    }

    /// Mark the result finished. Later calls are ignored.
    pub fn finish(&mut self, error_message: Option<String>) {
        if self.finished.is_some() {
            return;
        }
        self.finished = Some(Local::now());
        self.error_message = error_message;
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn finished(&self) -> Option<DateTime<Local>> {
        self.finished
    }

    /// Wall-clock duration, `None` while still in progress.
    pub fn duration(&self) -> Option<Duration> {
        self.finished.map(|end| end - self.started)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn succeeded(&self) -> bool {
        self.is_finished() && self.error_message.is_none()
    }
}
